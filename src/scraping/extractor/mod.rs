//! Media resolution
//!
//! Turns a page URL into a [`MediaDescriptor`]:
//! - pick a [`SiteStrategy`] from the host
//! - fetch the page through a [`PageSource`] (the dispatcher in production)
//! - run the strategy's parse chain and score the candidates
//!
//! Site strategies that fail for any reason other than a compliance or quota
//! refusal fall back to the generic strategy.

mod chain;
mod page;
mod scoring;
mod sites;
mod types;

pub use chain::{
    EmbeddedElement, InitialStateManifest, ParseChain, ParseStep, PlayInfoManifest,
    PlayerResponseManifest, StepContext, VendorApiProbe, BILIBILI_VIEW_API,
};
pub use page::{extract_assigned_json, PageProfile, PageSnapshot};
pub use scoring::{BandwidthLabel, QualityTable, QualityTier, UrlMarker};
pub use sites::{download_headers, SiteStrategy};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use crate::scraping::credentials::CredentialStore;
use crate::scraping::fetcher::{DispatchError, Dispatcher, RequestOptions};
use crate::types::{MediaDescriptor, MediaKind};

/// Where page bodies come from
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str, options: RequestOptions) -> Result<String, DispatchError>;
}

#[async_trait]
impl PageSource for Dispatcher {
    async fn fetch_page(&self, url: &str, options: RequestOptions) -> Result<String, DispatchError> {
        let response = self.get(url, options).await?;
        Ok(response.text().await?)
    }
}

/// Page URL -> media descriptor
pub struct MediaResolver {
    source: Arc<dyn PageSource>,
    credentials: Option<Arc<CredentialStore>>,
    table: QualityTable,
}

impl MediaResolver {
    pub fn new(source: Arc<dyn PageSource>, table: QualityTable) -> Self {
        Self {
            source,
            credentials: None,
            table,
        }
    }

    /// Resolver fetching through `dispatcher` and sharing its cookie store
    pub fn with_dispatcher(dispatcher: Arc<Dispatcher>, table: QualityTable) -> Self {
        let credentials = Arc::clone(dispatcher.credentials());
        Self::new(dispatcher, table).with_credentials(credentials)
    }

    pub fn with_credentials(mut self, credentials: Arc<CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Resolve a page URL
    pub async fn resolve(&self, url: &str) -> Result<MediaDescriptor, ResolveError> {
        let page_url = parse_page_url(url)?;
        let strategy = SiteStrategy::for_url(&page_url);
        tracing::info!("Resolving {} with the {} strategy", page_url, strategy);

        if strategy == SiteStrategy::Generic {
            return self.resolve_generic(&page_url).await;
        }

        match self.resolve_site(strategy, &page_url).await {
            Ok(descriptor) => Ok(descriptor),
            Err(e) if e.is_refusal() => Err(e.into()),
            Err(e) => {
                tracing::warn!(
                    "{} strategy failed for {}: {}; falling back to generic extraction",
                    strategy,
                    page_url,
                    e
                );
                let mut descriptor = self.resolve_generic(&page_url).await?;
                descriptor.original_url = page_url.to_string();
                descriptor.login_required = true;
                Ok(descriptor)
            }
        }
    }

    async fn resolve_site(&self, strategy: SiteStrategy, url: &Url) -> Result<MediaDescriptor, DispatchError> {
        let options = self.site_options(strategy);
        let html = self.source.fetch_page(url.as_str(), options.clone()).await?;
        let page = PageSnapshot::capture(&html, url, &strategy.profile());

        let ctx = StepContext {
            page: &page,
            table: &self.table,
            source: self.source.as_ref(),
            options: &options,
        };
        let selection = strategy.chain().run(&ctx).await?;

        let mut descriptor = MediaDescriptor::new(
            strategy.default_kind(),
            page.title.clone().unwrap_or_else(|| strategy.default_title().to_string()),
            strategy.source_tag(url),
            url.as_str(),
        );
        descriptor.author = page.author.clone();

        match selection {
            Some(selection) => apply_selection(&mut descriptor, selection),
            None => {
                tracing::warn!(
                    "No stream URLs found on {}; the site probably requires a logged-in session",
                    url
                );
                descriptor.login_required = true;
            }
        }

        Ok(descriptor)
    }

    async fn resolve_generic(&self, url: &Url) -> Result<MediaDescriptor, ResolveError> {
        let strategy = SiteStrategy::Generic;
        let html = self.source.fetch_page(url.as_str(), RequestOptions::new()).await?;
        let page = PageSnapshot::capture(&html, url, &strategy.profile());

        let options = RequestOptions::new();
        let ctx = StepContext {
            page: &page,
            table: &self.table,
            source: self.source.as_ref(),
            options: &options,
        };
        let selection = strategy.chain().run(&ctx).await?;

        let mut descriptor = MediaDescriptor::new(
            MediaKind::Unknown,
            page.title.clone().unwrap_or_else(|| strategy.default_title().to_string()),
            strategy.source_tag(url),
            url.as_str(),
        );

        if let Some(selection) = selection {
            apply_selection(&mut descriptor, selection);
            descriptor.kind = if descriptor.video_url.is_some() {
                MediaKind::Video
            } else if descriptor.audio_url.is_some() {
                MediaKind::Audio
            } else {
                MediaKind::Unknown
            };
        } else {
            tracing::info!("No media elements found on {}", url);
        }

        Ok(descriptor)
    }

    /// Persisted cookies for strategies that need a session
    fn site_options(&self, strategy: SiteStrategy) -> RequestOptions {
        let options = RequestOptions::new();
        let (Some(domain), Some(store)) = (strategy.cookie_domain(), &self.credentials) else {
            return options;
        };

        match store.load(domain) {
            Ok(Some(cookies)) => {
                tracing::info!("Using {} saved cookies for {}", cookies.len(), domain);
                options.cookies(cookies)
            }
            Ok(None) => {
                tracing::warn!("No saved cookies for {}; continuing anonymously", domain);
                options
            }
            Err(e) => {
                tracing::warn!("Failed to load cookies for {}: {}", domain, e);
                options
            }
        }
    }
}

fn apply_selection(descriptor: &mut MediaDescriptor, selection: StreamSelection) {
    if let Some(title) = selection.title {
        descriptor.title = title;
    }
    if selection.author.is_some() {
        descriptor.author = selection.author;
    }
    descriptor.video_url = selection.video_url;
    descriptor.audio_url = selection.audio_url;
    descriptor.quality = selection.quality;
    descriptor.bandwidth = selection.bandwidth;
    descriptor.available_qualities = selection.available_qualities;
}

/// Absolute http(s) URL with a host
fn parse_page_url(url: &str) -> Result<Url, ResolveError> {
    let parsed = Url::parse(url.trim()).map_err(|e| ResolveError::InvalidUrl(format!("{}: {}", url, e)))?;
    let has_host = parsed.host_str().map(|h| !h.is_empty()).unwrap_or(false);
    if matches!(parsed.scheme(), "http" | "https") && has_host {
        Ok(parsed)
    } else {
        Err(ResolveError::InvalidUrl(url.to_string()))
    }
}
