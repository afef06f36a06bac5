//! Compliance and request dispatch configuration

use serde::{Deserialize, Serialize};

use super::{DEFAULT_BROWSER_AGENTS, DEFAULT_USER_AGENT};

/// robots.txt compliance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Honour robots.txt rules (false = every path is allowed)
    pub enabled: bool,
    /// Agent name matched against `User-agent` sections
    pub user_agent: String,
    /// Timeout for fetching robots.txt (seconds)
    pub robots_timeout_secs: u64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            robots_timeout_secs: 10,
        }
    }
}

/// Request dispatch configuration: throttling, quotas and retries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Delay between requests to the same origin when robots.txt has no crawl-delay (milliseconds)
    pub base_delay_ms: u64,
    /// Lower bound of the random jitter added to every wait (milliseconds)
    pub jitter_min_ms: u64,
    /// Upper bound of the random jitter added to every wait (milliseconds)
    pub jitter_max_ms: u64,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Backoff unit: retry n waits `unit * (2^n + U(0,1))` (milliseconds)
    pub backoff_unit_ms: u64,
    /// Requests allowed per origin before the origin is cut off
    pub max_pages_per_origin: u64,
    /// Request timeout (seconds)
    pub request_timeout_secs: u64,
    /// Hosts that bypass compliance and throttling (substring match)
    pub exempt_hosts: Vec<String>,
    /// User-agent pool rotated per request
    pub user_agents: Vec<String>,
    /// Accept-Language header sent with every request
    pub accept_language: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 2000,
            jitter_min_ms: 1000,
            jitter_max_ms: 3000,
            max_retries: 3,
            backoff_unit_ms: 1000,
            max_pages_per_origin: 100,
            request_timeout_secs: 30,
            exempt_hosts: vec!["example.com".to_string()],
            user_agents: DEFAULT_BROWSER_AGENTS.iter().map(|s| s.to_string()).collect(),
            accept_language: "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
        }
    }
}
