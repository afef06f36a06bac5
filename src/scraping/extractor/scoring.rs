//! Stream quality scoring
//!
//! All heuristics are data in [`QualityTable`] so they can be tuned from the
//! `[quality]` config section when a site changes its labels.

use serde::{Deserialize, Serialize};

use super::types::{ScoredCandidate, StreamCandidate, StreamSelection};

/// A quality label and the score it is worth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityTier {
    pub label: String,
    pub score: u64,
}

/// A URL fragment that reveals the quality of a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMarker {
    pub marker: String,
    pub label: String,
}

/// Streams faster than `above` bits/s get `label`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthLabel {
    pub above: u64,
    pub label: String,
}

/// Scoring tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityTable {
    /// Label tiers, searched in order; the first substring match wins
    pub tiers: Vec<QualityTier>,
    /// URL fragment of the preferred delivery format (segmented DASH)
    pub preferred_marker: String,
    /// Added to the score of preferred candidates
    pub preferred_bonus: u64,
    /// Used to name a winner whose label is missing or garbled
    pub url_markers: Vec<UrlMarker>,
    /// Bandwidth breakpoints, highest first
    pub bandwidth_labels: Vec<BandwidthLabel>,
    /// Label when no breakpoint matches
    pub fallback_label: String,
    /// Labels containing any of these are treated as missing
    pub garbled_markers: Vec<String>,
}

impl Default for QualityTable {
    fn default() -> Self {
        let tiers = [
            ("4K", 100),
            ("2160p", 95),
            ("2160", 95),
            ("1440p", 90),
            ("1080p60", 85),
            ("1080p", 80),
            ("720p60", 75),
            ("720p", 70),
            ("480p", 60),
            ("360p", 50),
            ("240p", 40),
            ("144p", 30),
        ];
        let bandwidth_labels = [
            (2_000_000, "1080p+"),
            (1_000_000, "1080p"),
            (500_000, "720p"),
            (300_000, "480p"),
        ];

        Self {
            tiers: tiers
                .iter()
                .map(|(label, score)| QualityTier {
                    label: label.to_string(),
                    score: *score,
                })
                .collect(),
            preferred_marker: ".m4s".to_string(),
            preferred_bonus: 1000,
            url_markers: vec![
                UrlMarker {
                    marker: "30080".to_string(),
                    label: "1080p".to_string(),
                },
                UrlMarker {
                    marker: "16".to_string(),
                    label: "low".to_string(),
                },
            ],
            bandwidth_labels: bandwidth_labels
                .iter()
                .map(|(above, label)| BandwidthLabel {
                    above: *above,
                    label: label.to_string(),
                })
                .collect(),
            fallback_label: "sd".to_string(),
            garbled_markers: vec!["未知".to_string(), "鏈煡".to_string()],
        }
    }
}

impl QualityTable {
    /// Score of the first tier whose label occurs in `text` (case-insensitive)
    pub fn tier_of(&self, text: &str) -> Option<u64> {
        let text = text.to_lowercase();
        self.tiers
            .iter()
            .find(|tier| text.contains(&tier.label.to_lowercase()))
            .map(|tier| tier.score)
    }

    /// Score without the preferred bonus.
    ///
    /// Label tier, else codecs tier, else raw bandwidth, else raw size, else id tier.
    pub fn base_score(&self, candidate: &StreamCandidate) -> u64 {
        candidate
            .label
            .as_deref()
            .and_then(|label| self.tier_of(label))
            .or_else(|| candidate.codecs.as_deref().and_then(|c| self.tier_of(c)))
            .or(candidate.bandwidth)
            .or(candidate.size)
            .or_else(|| candidate.id.as_deref().and_then(|id| self.tier_of(id)))
            .unwrap_or(0)
    }

    pub fn is_preferred(&self, candidate: &StreamCandidate) -> bool {
        !self.preferred_marker.is_empty() && candidate.url.contains(&self.preferred_marker)
    }

    pub fn score(&self, candidate: StreamCandidate) -> ScoredCandidate {
        let preferred = self.is_preferred(&candidate);
        let mut score = self.base_score(&candidate);
        if preferred {
            score = score.saturating_add(self.preferred_bonus);
        }
        ScoredCandidate {
            candidate,
            score,
            preferred,
        }
    }

    /// Score and sort video candidates, best first.
    ///
    /// Preferred candidates outrank all others; ties keep manifest order.
    pub fn rank_video(&self, candidates: Vec<StreamCandidate>) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> = candidates.into_iter().map(|c| self.score(c)).collect();
        scored.sort_by(|a, b| (b.preferred, b.score).cmp(&(a.preferred, a.score)));
        scored
    }

    /// Audio candidates by bandwidth, best first; ties keep manifest order
    pub fn rank_audio(&self, mut candidates: Vec<StreamCandidate>) -> Vec<StreamCandidate> {
        candidates.sort_by(|a, b| b.bandwidth.unwrap_or(0).cmp(&a.bandwidth.unwrap_or(0)));
        candidates
    }

    pub fn is_garbled(&self, label: &str) -> bool {
        label.trim().is_empty() || self.garbled_markers.iter().any(|m| label.contains(m.as_str()))
    }

    /// Name a stream from its URL or bandwidth
    pub fn infer_label(&self, candidate: &StreamCandidate) -> String {
        if let Some(marker) = self
            .url_markers
            .iter()
            .find(|m| !m.marker.is_empty() && candidate.url.contains(&m.marker))
        {
            return marker.label.clone();
        }

        let bandwidth = candidate.bandwidth.unwrap_or(0);
        self.bandwidth_labels
            .iter()
            .find(|b| bandwidth > b.above)
            .map(|b| b.label.clone())
            .unwrap_or_else(|| self.fallback_label.clone())
    }

    /// Display label of a selected stream
    pub fn label_for(&self, candidate: &StreamCandidate) -> String {
        match candidate.label.as_deref() {
            Some(label) if !self.is_garbled(label) => label.to_string(),
            _ => self.infer_label(candidate),
        }
    }

    /// Distinct usable labels in manifest order
    pub fn available_qualities(&self, candidates: &[StreamCandidate]) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for label in candidates.iter().filter_map(|c| c.label.as_deref()) {
            if !self.is_garbled(label) && !labels.iter().any(|l| l == label) {
                labels.push(label.to_string());
            }
        }
        labels
    }

    /// Pick the best video and audio streams. None when there is nothing to pick.
    pub fn select(
        &self,
        video: Vec<StreamCandidate>,
        audio: Vec<StreamCandidate>,
    ) -> Option<StreamSelection> {
        if video.is_empty() && audio.is_empty() {
            return None;
        }

        let available_qualities = self.available_qualities(&video);
        let best_video = self.rank_video(video).into_iter().next();
        let best_audio = self.rank_audio(audio).into_iter().next();

        let mut selection = StreamSelection {
            available_qualities,
            audio_url: best_audio.map(|a| a.url),
            ..Default::default()
        };

        if let Some(best) = best_video {
            let quality = self.label_for(&best.candidate);
            tracing::info!(
                "Selected {} stream (score {}, bandwidth {:?})",
                quality,
                best.score,
                best.candidate.bandwidth
            );
            selection.quality = Some(quality);
            selection.bandwidth = best.candidate.bandwidth;
            selection.video_url = Some(best.candidate.url);
        }

        Some(selection)
    }
}
