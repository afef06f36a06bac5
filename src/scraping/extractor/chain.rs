//! Ordered parse steps
//!
//! Each step looks at one kind of payload and either yields a stream
//! selection or passes. Steps are independent, so a markup change that
//! breaks one leaves the others working.

use async_trait::async_trait;
use regex_lite::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::page::PageSnapshot;
use super::scoring::QualityTable;
use super::types::{value_as_text, value_as_u64, StreamCandidate, StreamSelection};
use super::PageSource;
use crate::scraping::fetcher::{DispatchError, RequestOptions};

static RE_BVID: OnceLock<Regex> = OnceLock::new();

/// Vendor metadata endpoint probed by [`VendorApiProbe`]
pub const BILIBILI_VIEW_API: &str = "https://api.bilibili.com/x/web-interface/view";

/// What a step gets to look at
pub struct StepContext<'a> {
    pub page: &'a PageSnapshot,
    pub table: &'a QualityTable,
    /// For steps that need a follow-up request
    pub source: &'a dyn PageSource,
    /// Options the page itself was fetched with (cookies)
    pub options: &'a RequestOptions,
}

/// One extraction strategy
#[async_trait]
pub trait ParseStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` passes to the next step. Only dispatcher refusals should be returned as errors.
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Option<StreamSelection>, DispatchError>;
}

/// Steps tried in order until one yields streams
#[derive(Default)]
pub struct ParseChain {
    steps: Vec<Box<dyn ParseStep>>,
    /// Only a selection with a video URL ends the chain
    require_video: bool,
}

impl ParseChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, step: impl ParseStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Keep going past audio-only selections
    pub fn requiring_video(mut self) -> Self {
        self.require_video = true;
        self
    }

    fn accepts(&self, selection: &StreamSelection) -> bool {
        if self.require_video {
            selection.video_url.is_some()
        } else {
            selection.has_streams()
        }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, ctx: &StepContext<'_>) -> Result<Option<StreamSelection>, DispatchError> {
        for step in &self.steps {
            match step.apply(ctx).await? {
                Some(selection) if self.accepts(&selection) => {
                    tracing::info!("{} found streams on {}", step.name(), ctx.page.url);
                    return Ok(Some(selection));
                }
                _ => {
                    tracing::debug!("{} found nothing on {}", step.name(), ctx.page.url);
                }
            }
        }
        Ok(None)
    }
}

/// `<video>` (and optionally `<audio>`) elements with a usable source
pub struct EmbeddedElement {
    pub include_audio: bool,
}

#[async_trait]
impl ParseStep for EmbeddedElement {
    fn name(&self) -> &'static str {
        "embedded-element"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Option<StreamSelection>, DispatchError> {
        let video_url = ctx.page.video_sources.first().cloned();
        let audio_url = if self.include_audio {
            ctx.page.audio_sources.first().cloned()
        } else {
            None
        };

        let selection = StreamSelection {
            video_url,
            audio_url,
            ..Default::default()
        };
        Ok(selection.has_streams().then_some(selection))
    }
}

/// DASH manifest assigned to `window.__playinfo__`
pub struct PlayInfoManifest;

impl PlayInfoManifest {
    const MARKER: &'static str = "window.__playinfo__";

    fn candidates(streams: Option<&Value>) -> Vec<StreamCandidate> {
        streams
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .enumerate()
                    .filter_map(|(i, entry)| {
                        StreamCandidate::from_manifest(entry, "baseUrl", i)
                            .or_else(|| StreamCandidate::from_manifest(entry, "base_url", i))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ParseStep for PlayInfoManifest {
    fn name(&self) -> &'static str {
        "playinfo-manifest"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Option<StreamSelection>, DispatchError> {
        let Some(playinfo) = ctx.page.assigned_json(Self::MARKER) else {
            return Ok(None);
        };
        let Some(dash) = playinfo.pointer("/data/dash") else {
            tracing::debug!("{} has no data.dash section", Self::MARKER);
            return Ok(None);
        };

        let video = Self::candidates(dash.get("video"));
        let audio = Self::candidates(dash.get("audio"));
        tracing::debug!(
            "{} lists {} video and {} audio streams",
            Self::MARKER,
            video.len(),
            audio.len()
        );

        Ok(ctx.table.select(video, audio))
    }
}

/// Play URLs inside the `window.__INITIAL_STATE__` page state
pub struct InitialStateManifest;

impl InitialStateManifest {
    const MARKER: &'static str = "window.__INITIAL_STATE__";
}

#[async_trait]
impl ParseStep for InitialStateManifest {
    fn name(&self) -> &'static str {
        "initial-state-manifest"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Option<StreamSelection>, DispatchError> {
        let Some(state) = ctx.page.assigned_json(Self::MARKER) else {
            return Ok(None);
        };

        let video: Vec<StreamCandidate> = state
            .pointer("/video/playUrlInfo")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .enumerate()
                    .filter_map(|(i, entry)| StreamCandidate::from_manifest(entry, "url", i))
                    .collect()
            })
            .unwrap_or_default();

        Ok(ctx.table.select(video, Vec::new()))
    }
}

/// Asks the vendor API whether the video exists. Never yields streams.
pub struct VendorApiProbe;

impl VendorApiProbe {
    pub fn video_id(url: &str) -> Option<String> {
        let re = RE_BVID.get_or_init(|| Regex::new(r"BV\w+").unwrap());
        re.find(url).map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl ParseStep for VendorApiProbe {
    fn name(&self) -> &'static str {
        "vendor-api-probe"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Option<StreamSelection>, DispatchError> {
        let Some(bvid) = Self::video_id(ctx.page.url.as_str()) else {
            return Ok(None);
        };

        let options = RequestOptions::new()
            .header("Referer", ctx.page.url.as_str())
            .cookies(ctx.options.cookies.clone())
            .param("bvid", bvid.as_str());

        let body = match ctx.source.fetch_page(BILIBILI_VIEW_API, options).await {
            Ok(body) => body,
            Err(e) if e.is_refusal() => return Err(e),
            Err(e) => {
                tracing::debug!("Video API probe for {} failed: {}", bvid, e);
                return Ok(None);
            }
        };

        match serde_json::from_str::<Value>(&body) {
            Ok(response) if response.get("code").and_then(Value::as_i64) == Some(0) => {
                let title = response
                    .pointer("/data/title")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                tracing::info!("Video API knows {} ({}), but exposes no stream URLs", bvid, title);
            }
            Ok(response) => {
                tracing::debug!("Video API returned code {:?} for {}", response.get("code"), bvid);
            }
            Err(e) => {
                tracing::debug!("Video API returned non-JSON for {}: {}", bvid, e);
            }
        }

        Ok(None)
    }
}

/// Stream formats in the `ytInitialPlayerResponse` player config
pub struct PlayerResponseManifest;

impl PlayerResponseManifest {
    const MARKER: &'static str = "ytInitialPlayerResponse";

    fn candidate(entry: &Value, label_key: &str, index: usize) -> Option<StreamCandidate> {
        let url = entry.get("url")?.as_str()?.to_string();
        let codecs = entry
            .get("mimeType")
            .and_then(Value::as_str)
            .and_then(|mime| mime.split("codecs=").nth(1))
            .map(|c| c.trim_matches(|ch| ch == '"' || ch == ' ').to_string());

        Some(StreamCandidate {
            url,
            label: entry.get(label_key).and_then(value_as_text),
            codecs,
            bandwidth: entry.get("bitrate").and_then(value_as_u64),
            size: entry.get("contentLength").and_then(value_as_u64),
            id: entry.get("itag").and_then(value_as_text),
            index,
        })
    }

    fn is_audio(entry: &Value) -> bool {
        entry
            .get("mimeType")
            .and_then(Value::as_str)
            .map(|mime| mime.starts_with("audio/"))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ParseStep for PlayerResponseManifest {
    fn name(&self) -> &'static str {
        "player-response-manifest"
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Option<StreamSelection>, DispatchError> {
        let Some(player) = ctx.page.assigned_json(Self::MARKER) else {
            return Ok(None);
        };

        // Progressive formats carry muxed audio; adaptive ones are split
        let video: Vec<StreamCandidate> = player
            .pointer("/streamingData/formats")
            .and_then(Value::as_array)
            .map(|formats| {
                formats
                    .iter()
                    .enumerate()
                    .filter_map(|(i, f)| Self::candidate(f, "qualityLabel", i))
                    .collect()
            })
            .unwrap_or_default();

        let audio: Vec<StreamCandidate> = player
            .pointer("/streamingData/adaptiveFormats")
            .and_then(Value::as_array)
            .map(|formats| {
                formats
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| Self::is_audio(f))
                    .filter_map(|(i, f)| Self::candidate(f, "audioQuality", i))
                    .collect()
            })
            .unwrap_or_default();

        let Some(mut selection) = ctx.table.select(video, audio) else {
            return Ok(None);
        };
        selection.title = player
            .pointer("/videoDetails/title")
            .and_then(Value::as_str)
            .map(str::to_string);
        selection.author = player
            .pointer("/videoDetails/author")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Some(selection))
    }
}
