//! Compliance gate for crawling
//!
//! Fetches and caches robots.txt per origin, answers whether a URL may be
//! fetched and what crawl-delay the origin asks for. A robots.txt that cannot
//! be obtained allows everything.
//!
//! Rule evaluation is deliberately simple: plain prefix matching, no `*` or
//! `$` patterns, and the last matching rule in file order decides.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

use crate::config::{ComplianceConfig, DEFAULT_USER_AGENT};

/// One `Allow` / `Disallow` line together with the section it appeared in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    /// Lowercased `User-agent` value of the enclosing section (None before any section)
    pub agent: Option<String>,
    /// `Allow` (true) or `Disallow` (false)
    pub allow: bool,
    /// Path prefix the rule covers
    pub prefix: String,
}

impl PolicyRule {
    /// Whether the rule's section applies to `user_agent`
    pub fn applies_to(&self, user_agent: &str) -> bool {
        self.agent
            .as_deref()
            .map(|agent| section_applies(agent, user_agent))
            .unwrap_or(false)
    }
}

/// A section applies when it is the wildcard or our agent name starts with it
fn section_applies(agent: &str, user_agent: &str) -> bool {
    agent == "*" || user_agent.to_lowercase().starts_with(agent)
}

/// Parsed robots.txt for one origin
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    rules: Vec<PolicyRule>,
    crawl_delay: Option<f64>,
    user_agent: String,
    fetched_at: DateTime<Utc>,
    present: bool,
}

impl OriginPolicy {
    /// Parse robots.txt content as seen by `user_agent`
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let mut rules = Vec::new();
        let mut crawl_delay = None;
        let mut current_agent: Option<String> = None;

        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    current_agent = Some(value.to_lowercase());
                }
                "disallow" | "allow" => {
                    if value.is_empty() {
                        continue;
                    }
                    let prefix = if value.starts_with('/') {
                        value.to_string()
                    } else {
                        format!("/{}", value)
                    };
                    rules.push(PolicyRule {
                        agent: current_agent.clone(),
                        allow: directive == "allow",
                        prefix,
                    });
                }
                "crawl-delay" => {
                    let applies = current_agent
                        .as_deref()
                        .map(|agent| section_applies(agent, user_agent))
                        .unwrap_or(false);
                    if applies && crawl_delay.is_none() {
                        if let Ok(delay) = value.parse::<f64>() {
                            if delay.is_finite() && delay >= 0.0 {
                                crawl_delay = Some(delay);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        Self {
            rules,
            crawl_delay,
            user_agent: user_agent.to_string(),
            fetched_at: Utc::now(),
            present: true,
        }
    }

    /// Policy used when no robots.txt could be obtained
    pub fn absent(user_agent: &str) -> Self {
        Self {
            rules: Vec::new(),
            crawl_delay: None,
            user_agent: user_agent.to_string(),
            fetched_at: Utc::now(),
            present: false,
        }
    }

    /// Check a path (optionally with `?query`) against the rules.
    ///
    /// Every matching rule overrides the previous decision, so a later
    /// `Allow: /x/y` re-opens part of an earlier `Disallow: /x`.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut allowed = true;
        for rule in &self.rules {
            if rule.applies_to(&self.user_agent) && path.starts_with(&rule.prefix) {
                allowed = rule.allow;
            }
        }
        allowed
    }

    /// First `Crawl-delay` of a section that applies to us (seconds)
    pub fn crawl_delay(&self) -> Option<f64> {
        self.crawl_delay
    }

    /// All parsed rules in file order
    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Whether a robots.txt document was actually obtained
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// When the policy was fetched
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

/// Runtime configuration for the compliance gate
#[derive(Debug, Clone)]
pub struct PolitenessConfig {
    /// Honour robots.txt at all
    pub enabled: bool,
    /// Agent name matched against sections
    pub user_agent: String,
    /// Timeout for the robots.txt request
    pub robots_timeout: Duration,
}

impl PolitenessConfig {
    pub fn from_config(config: &ComplianceConfig) -> Self {
        Self {
            enabled: config.enabled,
            user_agent: config.user_agent.clone(),
            robots_timeout: Duration::from_secs(config.robots_timeout_secs),
        }
    }
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            robots_timeout: Duration::from_secs(10),
        }
    }
}

/// Origin string (`scheme://host[:port]`) used as the cache and quota key
pub fn origin_of(url: &Url) -> Option<String> {
    let origin = url.origin();
    if origin.is_tuple() {
        Some(origin.ascii_serialization())
    } else {
        None
    }
}

/// Per-origin robots.txt cache and evaluator
pub struct ComplianceGate {
    config: PolitenessConfig,
    /// One cell per origin so concurrent first lookups share a single fetch
    policies: DashMap<String, Arc<OnceCell<Arc<OriginPolicy>>>>,
    http_client: reqwest::Client,
}

impl ComplianceGate {
    /// Create a new compliance gate
    pub fn new(config: PolitenessConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.robots_timeout)
            .user_agent(&config.user_agent)
            .build()
            .unwrap_or_default();

        Self {
            config,
            policies: DashMap::new(),
            http_client,
        }
    }

    /// May `url` be fetched?
    pub async fn is_allowed(&self, url: &Url) -> bool {
        if !self.config.enabled {
            tracing::debug!("robots.txt checking disabled, allowing {}", url);
            return true;
        }

        let Some(policy) = self.policy(url).await else {
            return true;
        };

        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let allowed = policy.is_allowed(&target);
        tracing::debug!("robots.txt verdict for {}: {}", url, allowed);
        allowed
    }

    /// Crawl-delay requested by the URL's origin, in seconds
    pub async fn crawl_delay(&self, url: &Url) -> Option<f64> {
        self.policy(url).await.and_then(|p| p.crawl_delay())
    }

    /// Cached (or freshly fetched) policy for the URL's origin
    pub async fn policy(&self, url: &Url) -> Option<Arc<OriginPolicy>> {
        let origin = origin_of(url)?;

        // Clone the cell out so the map shard is not locked across the fetch
        let cell = self
            .policies
            .entry(origin.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let policy = cell
            .get_or_init(|| self.fetch_policy(&origin))
            .await
            .clone();
        Some(policy)
    }

    /// Drop the cached policy of one origin
    pub fn invalidate(&self, origin: &str) {
        self.policies.remove(origin.trim_end_matches('/'));
    }

    /// Drop every cached policy
    pub fn clear(&self) {
        self.policies.clear();
    }

    /// Number of origins with a cached policy
    pub fn cached_origins(&self) -> usize {
        self.policies.len()
    }

    /// Agent name used for section matching
    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }

    async fn fetch_policy(&self, origin: &str) -> Arc<OriginPolicy> {
        let robots_url = format!("{}/robots.txt", origin);

        let policy = match self.http_client.get(&robots_url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                match response.text().await {
                    Ok(body) => OriginPolicy::parse(&body, &self.config.user_agent),
                    Err(e) => {
                        tracing::warn!("Failed to read {}: {}", robots_url, e);
                        OriginPolicy::absent(&self.config.user_agent)
                    }
                }
            }
            Ok(response) => {
                tracing::info!("No robots.txt at {} (status {})", robots_url, response.status());
                OriginPolicy::absent(&self.config.user_agent)
            }
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", robots_url, e);
                OriginPolicy::absent(&self.config.user_agent)
            }
        };

        Arc::new(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const AGENT: &str = "MediaCrawlBot/1.0";

    #[test]
    fn test_last_matching_rule_wins() {
        let content = r#"
User-agent: *
Disallow: /x
Allow: /x/y
"#;
        let policy = OriginPolicy::parse(content, AGENT);

        assert!(policy.is_allowed("/x/y/page"));
        assert!(!policy.is_allowed("/x/other"));
        assert!(policy.is_allowed("/elsewhere"));
    }

    #[test]
    fn test_later_disallow_overrides_allow() {
        let content = r#"
User-agent: *
Allow: /docs
Disallow: /docs/private
"#;
        let policy = OriginPolicy::parse(content, AGENT);

        assert!(policy.is_allowed("/docs/public"));
        assert!(!policy.is_allowed("/docs/private/file"));
    }

    #[test]
    fn test_sections_for_other_agents_are_ignored() {
        let content = r#"
# comment line
User-agent: OtherBot
Disallow: /

User-agent: mediacrawlbot
Disallow: /admin
Crawl-delay: 4

User-agent: *
Crawl-delay: 9
"#;
        let policy = OriginPolicy::parse(content, AGENT);

        assert!(policy.is_allowed("/public"));
        assert!(!policy.is_allowed("/admin/settings"));
        // First crawl-delay of a matching section
        assert_eq!(policy.crawl_delay(), Some(4.0));
    }

    #[test]
    fn test_no_wildcard_support() {
        let content = "User-agent: *\nDisallow: /*.pdf$\n";
        let policy = OriginPolicy::parse(content, AGENT);

        // Patterns are plain prefixes
        assert!(policy.is_allowed("/docs/manual.pdf"));
        assert!(!policy.is_allowed("/*.pdf$"));
    }

    #[test]
    fn test_directives_are_case_insensitive() {
        let content = "USER-AGENT: *\nDISALLOW: /private\ncrawl-DELAY: 1.5\n";
        let policy = OriginPolicy::parse(content, AGENT);

        assert!(!policy.is_allowed("/private/a"));
        assert_eq!(policy.crawl_delay(), Some(1.5));
    }

    #[test]
    fn test_rules_filtered_to_our_agent() {
        let content = "Disallow: /early\nUser-agent: OtherBot\nDisallow: /\nUser-agent: *\nAllow: /pub\n";
        let policy = OriginPolicy::parse(content, AGENT);

        let ours: Vec<&str> = policy
            .rules()
            .iter()
            .filter(|r| r.applies_to(AGENT))
            .map(|r| r.prefix.as_str())
            .collect();
        assert_eq!(policy.rules().len(), 3);
        assert_eq!(ours, vec!["/pub"]);
    }

    #[test]
    fn test_rules_before_any_section_do_not_apply() {
        let policy = OriginPolicy::parse("Disallow: /\n", AGENT);
        assert!(policy.is_allowed("/anything"));
        assert_eq!(policy.rules().len(), 1);
    }

    #[test]
    fn test_origin_of() {
        let url = Url::parse("https://www.example.org:8443/a/b?c=d").unwrap();
        assert_eq!(origin_of(&url).as_deref(), Some("https://www.example.org:8443"));

        let data = Url::parse("data:text/plain,hello").unwrap();
        assert!(origin_of(&data).is_none());
    }

    #[tokio::test]
    async fn test_missing_robots_fails_open() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/robots.txt");
            then.status(404);
        });

        let gate = ComplianceGate::new(PolitenessConfig::default());
        let url = Url::parse(&server.url("/private/page")).unwrap();

        assert!(gate.is_allowed(&url).await);
        assert!(gate.is_allowed(&url).await);
        assert_eq!(gate.crawl_delay(&url).await, None);
        // Cached after the first lookup
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn test_unreachable_robots_fails_open() {
        let gate = ComplianceGate::new(PolitenessConfig {
            robots_timeout: Duration::from_millis(500),
            ..Default::default()
        });
        // Nothing listens on port 9 (discard) on test machines
        let url = Url::parse("http://127.0.0.1:9/page").unwrap();

        assert!(gate.is_allowed(&url).await);
        let policy = gate.policy(&url).await.unwrap();
        assert!(!policy.is_present());
    }

    #[tokio::test]
    async fn test_gate_denies_and_invalidates() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/robots.txt");
            then.status(200)
                .body("User-agent: *\nDisallow: /private\nCrawl-delay: 2\n");
        });

        let gate = ComplianceGate::new(PolitenessConfig::default());
        let denied = Url::parse(&server.url("/private/page")).unwrap();
        let allowed = Url::parse(&server.url("/public")).unwrap();

        assert!(!gate.is_allowed(&denied).await);
        assert!(gate.is_allowed(&allowed).await);
        assert_eq!(gate.crawl_delay(&allowed).await, Some(2.0));
        mock.assert_calls(1);

        gate.invalidate(&server.base_url());
        assert_eq!(gate.cached_origins(), 0);
        assert!(!gate.is_allowed(&denied).await);
        mock.assert_calls(2);
    }

    #[tokio::test]
    async fn test_disabled_gate_allows_everything() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/robots.txt");
            then.status(200).body("User-agent: *\nDisallow: /\n");
        });

        let gate = ComplianceGate::new(PolitenessConfig {
            enabled: false,
            ..Default::default()
        });
        let url = Url::parse(&server.url("/anything")).unwrap();
        assert!(gate.is_allowed(&url).await);
    }
}
