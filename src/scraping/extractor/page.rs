//! Parsed view of a fetched page
//!
//! `scraper::Html` is not `Send`, so everything the parse steps need is
//! pulled out of the document up front and the DOM is dropped before any
//! further await.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

/// Selectors a site uses for its title and author
#[derive(Debug, Clone, Copy)]
pub struct PageProfile {
    pub title_selectors: &'static [&'static str],
    pub author_selectors: &'static [&'static str],
}

/// Everything the parse steps look at
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    /// Page URL, used to resolve relative sources
    pub url: Url,
    /// Text of the first element matching the profile's title selectors
    pub title: Option<String>,
    /// Text of the first element matching the profile's author selectors
    pub author: Option<String>,
    /// One resolved source per `<video>` element that has one, in document order
    pub video_sources: Vec<String>,
    /// One resolved source per `<audio>` element that has one, in document order
    pub audio_sources: Vec<String>,
    /// Inline script bodies
    pub scripts: Vec<String>,
}

impl PageSnapshot {
    pub fn capture(html: &str, url: &Url, profile: &PageProfile) -> Self {
        let document = Html::parse_document(html);

        Self {
            url: url.clone(),
            title: first_text(&document, profile.title_selectors),
            author: first_text(&document, profile.author_selectors),
            video_sources: media_sources(&document, "video", url),
            audio_sources: media_sources(&document, "audio", url),
            scripts: scripts(&document),
        }
    }

    /// JSON value assigned to `marker` in any inline script (`marker = {...}`)
    pub fn assigned_json(&self, marker: &str) -> Option<Value> {
        self.scripts
            .iter()
            .find_map(|script| extract_assigned_json(script, marker))
    }
}

/// Parse the JSON value that follows `marker =` in a script.
///
/// Only the first complete value is read, so trailing `;` or further
/// statements are ignored.
pub fn extract_assigned_json(script: &str, marker: &str) -> Option<Value> {
    for (start, _) in script.match_indices(marker) {
        let rest = script[start + marker.len()..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let mut values = serde_json::Deserializer::from_str(rest.trim_start()).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) => return Some(value),
            Some(Err(e)) => {
                tracing::debug!("Unparsable {} payload: {}", marker, e);
            }
            None => {}
        }
    }
    None
}

fn first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| {
            document
                .select(&selector)
                .map(element_text)
                .find(|text| !text.is_empty())
        })
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `src` of each element, else its first nested `<source src>`
fn media_sources(document: &Html, tag: &str, base: &Url) -> Vec<String> {
    let (Ok(element_selector), Ok(source_selector)) =
        (Selector::parse(tag), Selector::parse("source[src]"))
    else {
        return Vec::new();
    };

    document
        .select(&element_selector)
        .filter_map(|element| {
            element
                .value()
                .attr("src")
                .filter(|src| !src.trim().is_empty())
                .or_else(|| {
                    element
                        .select(&source_selector)
                        .filter_map(|source| source.value().attr("src"))
                        .find(|src| !src.trim().is_empty())
                })
        })
        .filter_map(|src| resolve_source(base, src.trim()))
        .collect()
}

fn resolve_source(base: &Url, src: &str) -> Option<String> {
    match base.join(src) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            tracing::debug!("Skipping unresolvable media source {:?}: {}", src, e);
            None
        }
    }
}

fn scripts(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("script") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|script| script.text().collect::<String>())
        .filter(|body| !body.trim().is_empty())
        .collect()
}
