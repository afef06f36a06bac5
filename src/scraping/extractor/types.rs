//! Media resolution types

use serde_json::Value;
use thiserror::Error;

use crate::scraping::fetcher::DispatchError;

/// Errors during media resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ResolveError {
    /// Refusals from the compliance gate or the origin quota
    pub fn is_refusal(&self) -> bool {
        match self {
            Self::Dispatch(e) => e.is_refusal(),
            Self::InvalidUrl(_) => false,
        }
    }
}

/// A stream URL found in a page manifest, before scoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamCandidate {
    pub url: String,
    /// Human-readable quality label (`1080P 高清`, `720p60`, ...)
    pub label: Option<String>,
    pub codecs: Option<String>,
    pub bandwidth: Option<u64>,
    pub size: Option<u64>,
    pub id: Option<String>,
    /// Position in the manifest
    pub index: usize,
}

impl StreamCandidate {
    pub fn new(url: impl Into<String>, index: usize) -> Self {
        Self {
            url: url.into(),
            index,
            ..Default::default()
        }
    }

    /// Build a candidate from a manifest entry; `url_key` names the field holding the URL.
    ///
    /// Entries without a string URL are skipped.
    pub fn from_manifest(entry: &Value, url_key: &str, index: usize) -> Option<Self> {
        let url = entry.get(url_key)?.as_str()?.to_string();
        if url.is_empty() {
            return None;
        }

        Some(Self {
            url,
            label: entry.get("description").and_then(value_as_text),
            codecs: entry.get("codecs").and_then(value_as_text),
            bandwidth: entry.get("bandwidth").and_then(value_as_u64),
            size: entry.get("size").and_then(value_as_u64),
            id: entry.get("id").and_then(value_as_text),
            index,
        })
    }
}

/// Strings stay strings, numbers are rendered, everything else is ignored
pub(crate) fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts integers and numeric strings (some manifests quote their numbers)
pub(crate) fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A candidate with its computed score
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredCandidate {
    pub candidate: StreamCandidate,
    /// Base score plus the preferred-format bonus
    pub score: u64,
    /// URL carries the preferred segment marker
    pub preferred: bool,
}

/// Outcome of a successful parse step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSelection {
    pub video_url: Option<String>,
    pub audio_url: Option<String>,
    pub quality: Option<String>,
    pub bandwidth: Option<u64>,
    pub available_qualities: Vec<String>,
    /// Title found inside the manifest, overriding the page title
    pub title: Option<String>,
    /// Author found inside the manifest, overriding the page author
    pub author: Option<String>,
}

impl StreamSelection {
    pub fn has_streams(&self) -> bool {
        self.video_url.is_some() || self.audio_url.is_some()
    }
}
