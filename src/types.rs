//! Core types shared by the resolver and the retriever

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of media a page resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    #[default]
    Unknown,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved result of media extraction for one page URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Media kind
    pub kind: MediaKind,
    /// Page or media title
    pub title: String,
    /// Uploader / author, when the page exposes one
    pub author: Option<String>,
    /// Source site tag (`bilibili`, `youtube`, or the host for generic pages)
    pub source: String,
    /// The page URL the descriptor was resolved from
    pub original_url: String,
    /// Selected video stream
    pub video_url: Option<String>,
    /// Selected audio stream
    pub audio_url: Option<String>,
    /// Quality label of the selected video stream
    pub quality: Option<String>,
    /// Bandwidth estimate of the selected video stream
    pub bandwidth: Option<u64>,
    /// Distinct quality labels observed while scoring
    #[serde(default)]
    pub available_qualities: Vec<String>,
    /// Site requires an authenticated session and none was usable
    #[serde(default)]
    pub login_required: bool,
}

impl MediaDescriptor {
    /// Create an empty descriptor for a page
    pub fn new(kind: MediaKind, title: impl Into<String>, source: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            author: None,
            source: source.into(),
            original_url: original_url.into(),
            video_url: None,
            audio_url: None,
            quality: None,
            bandwidth: None,
            available_qualities: Vec::new(),
            login_required: false,
        }
    }

    /// Whether at least one stream URL was resolved
    pub fn has_streams(&self) -> bool {
        self.video_url.is_some() || self.audio_url.is_some()
    }

    /// Whether extraction ended without a stream
    pub fn is_unresolved(&self) -> bool {
        !self.has_streams()
    }
}

/// Kind of local artifact produced by a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Video,
    Audio,
    Merged,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
            Self::Merged => f.write_str("merged"),
        }
    }
}

/// Local files produced by a download, keyed by artifact kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadResult {
    artifacts: BTreeMap<ArtifactKind, PathBuf>,
}

impl DownloadResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ArtifactKind, path: PathBuf) {
        self.artifacts.insert(kind, path);
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&Path> {
        self.artifacts.get(&kind).map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArtifactKind, &Path)> {
        self.artifacts.iter().map(|(k, v)| (*k, v.as_path()))
    }
}

/// Which streams a download should retrieve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadSelection {
    Video,
    Audio,
    #[default]
    Both,
}

impl DownloadSelection {
    pub fn wants_video(&self) -> bool {
        matches!(self, Self::Video | Self::Both)
    }

    pub fn wants_audio(&self) -> bool {
        matches!(self, Self::Audio | Self::Both)
    }
}
