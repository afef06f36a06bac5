//! Configuration for mediacrawl

mod download;
mod logging;
mod scraping;

pub use download::{CredentialsConfig, DownloadConfig};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use scraping::{ComplianceConfig, DispatchConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::scraping::extractor::QualityTable;

/// Agent name used when matching robots.txt sections
pub const DEFAULT_USER_AGENT: &str = "MediaCrawlBot/1.0 (complying with robots.txt)";

/// Browser identities rotated across outgoing requests
pub const DEFAULT_BROWSER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Firefox/89.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
];

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// robots.txt compliance
    #[serde(default)]
    pub compliance: ComplianceConfig,
    /// Throttling, quotas and retries
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Download targets and merging
    #[serde(default)]
    pub download: DownloadConfig,
    /// Persisted cookies
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Stream quality scoring tables
    #[serde(default)]
    pub quality: QualityTable,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.compliance.robots_timeout_secs == 0 {
            errors.push("robots_timeout_secs must be positive".to_string());
        }

        if self.dispatch.jitter_min_ms > self.dispatch.jitter_max_ms {
            errors.push(format!(
                "jitter_min_ms ({}) must not exceed jitter_max_ms ({})",
                self.dispatch.jitter_min_ms, self.dispatch.jitter_max_ms
            ));
        }
        if self.dispatch.max_pages_per_origin == 0 {
            errors.push("max_pages_per_origin must be positive".to_string());
        }
        if self.dispatch.request_timeout_secs == 0 {
            errors.push("request_timeout_secs must be positive".to_string());
        }
        if self.dispatch.max_retries > 10 {
            errors.push("max_retries must be <= 10".to_string());
        }

        if self.download.chunk_size == 0 {
            errors.push("chunk_size must be positive".to_string());
        }
        if self.download.max_concurrent_downloads == 0 {
            errors.push("max_concurrent_downloads must be positive".to_string());
        }
        if self.download.ffmpeg_path.as_os_str().is_empty() {
            errors.push("ffmpeg_path must not be empty".to_string());
        }

        if self.quality.tiers.is_empty() {
            errors.push("quality tiers must not be empty".to_string());
        }
        if self.quality.preferred_marker.is_empty() {
            errors.push("quality preferred_marker must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
