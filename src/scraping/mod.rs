//! Compliant fetching and media resolution
//!
//! Key components:
//! - `ComplianceGate`: robots.txt cache and evaluation
//! - `Dispatcher`: throttled, quota-limited HTTP with retries
//! - `CredentialStore`: per-domain session cookies
//! - `MediaResolver`: page URL to media descriptor
//! - `Retriever`: chunked downloads and merging
//! - `Merger`: ffmpeg remux contract

pub mod credentials;
pub mod extractor;
pub mod fetcher;
pub mod merger;
pub mod politeness;
pub mod retriever;

pub use credentials::{CookieSet, CredentialError, CredentialProvider, CredentialStore};
pub use extractor::{MediaResolver, PageSource, QualityTable, ResolveError, SiteStrategy};
pub use fetcher::{DispatchError, DispatchStats, Dispatcher, FetchConfig, RequestBody, RequestOptions};
pub use merger::Merger;
pub use politeness::{ComplianceGate, OriginPolicy, PolicyRule, PolitenessConfig};
pub use retriever::{
    DownloadProgress, DownloadRequest, ProgressFn, RetrieveError, Retriever, RetrieverConfig,
};
