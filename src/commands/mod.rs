//! CLI command implementations

pub mod cookies;
pub mod download;
pub mod resolve;
pub mod robots;

use anyhow::{Context, Result};
use mediacrawl::{
    config::Config,
    scraping::{
        ComplianceGate, CredentialStore, Dispatcher, FetchConfig, MediaResolver, PolitenessConfig,
        Retriever, RetrieverConfig,
    },
};
use std::sync::Arc;

/// Components shared by every command that touches the network
pub struct CrawlStack {
    pub gate: Arc<ComplianceGate>,
    pub credentials: Arc<CredentialStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub resolver: MediaResolver,
    pub retriever: Arc<Retriever>,
}

impl CrawlStack {
    pub fn from_config(config: &Config) -> Result<Self> {
        let gate = Arc::new(ComplianceGate::new(PolitenessConfig::from_config(
            &config.compliance,
        )));
        let credentials = Arc::new(CredentialStore::new(&config.credentials.cookies_dir));
        let dispatcher = Arc::new(
            Dispatcher::new(
                FetchConfig::from_config(&config.dispatch),
                Arc::clone(&gate),
                Arc::clone(&credentials),
            )
            .context("Failed to build HTTP client")?,
        );
        let resolver = MediaResolver::with_dispatcher(Arc::clone(&dispatcher), config.quality.clone());
        let retriever = Arc::new(Retriever::new(
            Arc::clone(&dispatcher),
            RetrieverConfig::from_config(&config.download),
        ));

        Ok(Self {
            gate,
            credentials,
            dispatcher,
            resolver,
            retriever,
        })
    }
}
