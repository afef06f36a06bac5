//! Per-site extraction strategies

use std::collections::BTreeMap;
use std::fmt;
use url::Url;

use super::chain::{
    EmbeddedElement, InitialStateManifest, ParseChain, PlayInfoManifest, PlayerResponseManifest,
    VendorApiProbe,
};
use super::page::PageProfile;
use crate::types::{MediaDescriptor, MediaKind};

/// Which extraction strategy handles a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteStrategy {
    Bilibili,
    YouTube,
    SoundCloud,
    Generic,
}

/// Host substring -> strategy, first match wins
const SITE_TABLE: &[(&str, SiteStrategy)] = &[
    ("youtube.com", SiteStrategy::YouTube),
    ("bilibili.com", SiteStrategy::Bilibili),
    ("soundcloud.com", SiteStrategy::SoundCloud),
];

impl SiteStrategy {
    pub fn for_url(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default().to_lowercase();
        SITE_TABLE
            .iter()
            .find(|(pattern, _)| host.contains(pattern))
            .map(|(_, strategy)| *strategy)
            .unwrap_or(Self::Generic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bilibili => "bilibili",
            Self::YouTube => "youtube",
            Self::SoundCloud => "soundcloud",
            Self::Generic => "generic",
        }
    }

    /// Source tag recorded on descriptors (the host for generic pages)
    pub fn source_tag(&self, url: &Url) -> String {
        match self {
            Self::Generic => url.host_str().unwrap_or_default().to_string(),
            _ => self.as_str().to_string(),
        }
    }

    /// Domain whose persisted cookies are sent with the page request
    pub fn cookie_domain(&self) -> Option<&'static str> {
        match self {
            Self::Bilibili => Some("bilibili.com"),
            _ => None,
        }
    }

    pub fn profile(&self) -> PageProfile {
        match self {
            Self::Bilibili => PageProfile {
                title_selectors: &["h1.video-title", "span.tit"],
                author_selectors: &["a.up-name", "a.username"],
            },
            Self::YouTube => PageProfile {
                title_selectors: &["title"],
                author_selectors: &[],
            },
            Self::SoundCloud => PageProfile {
                title_selectors: &["h1"],
                author_selectors: &["span[itemprop=author]"],
            },
            Self::Generic => PageProfile {
                title_selectors: &["title"],
                author_selectors: &[],
            },
        }
    }

    pub fn default_title(&self) -> &'static str {
        match self {
            Self::Bilibili => "Bilibili Video",
            Self::YouTube => "YouTube Video",
            Self::SoundCloud => "SoundCloud Audio",
            Self::Generic => "Unknown Media",
        }
    }

    /// Kind reported by a site strategy; generic pages derive theirs from what was found
    pub fn default_kind(&self) -> MediaKind {
        match self {
            Self::Bilibili | Self::YouTube => MediaKind::Video,
            Self::SoundCloud => MediaKind::Audio,
            Self::Generic => MediaKind::Unknown,
        }
    }

    pub fn chain(&self) -> ParseChain {
        match self {
            Self::Bilibili => ParseChain::new()
                .with(EmbeddedElement { include_audio: false })
                .with(PlayInfoManifest)
                .with(InitialStateManifest)
                .with(VendorApiProbe)
                .requiring_video(),
            Self::YouTube => ParseChain::new()
                .with(EmbeddedElement { include_audio: false })
                .with(PlayerResponseManifest)
                .requiring_video(),
            Self::SoundCloud | Self::Generic => {
                ParseChain::new().with(EmbeddedElement { include_audio: true })
            }
        }
    }
}

impl fmt::Display for SiteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra headers the CDN of a descriptor's source expects on media requests
pub fn download_headers(descriptor: &MediaDescriptor) -> BTreeMap<String, String> {
    let source = descriptor.source.to_lowercase();
    let mut headers = BTreeMap::new();

    if source.contains("bili") {
        let referer = if descriptor.original_url.is_empty() {
            "https://www.bilibili.com"
        } else {
            descriptor.original_url.as_str()
        };
        headers.insert("Referer".to_string(), referer.to_string());
        headers.insert("Origin".to_string(), "https://www.bilibili.com".to_string());
    } else if source.contains("youtube") {
        headers.insert("Referer".to_string(), "https://www.youtube.com/".to_string());
    }

    headers
}
