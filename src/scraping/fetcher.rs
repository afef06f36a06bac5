//! Request dispatcher
//!
//! Every outgoing request passes the same pre-flight sequence:
//! - exempt hosts skip everything below
//! - robots.txt compliance (`PolicyDenied`)
//! - per-origin quota (`QuotaExceeded`, nothing is sent)
//! - per-origin spacing: crawl-delay (or the base delay) since the last
//!   request plus random jitter
//!
//! Quota and spacing run under the origin's lock, so concurrent callers
//! hitting one origin are serialized. Failed transfers are retried with
//! exponential backoff.

use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, USER_AGENT};
use reqwest::{Method, Response};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use super::credentials::{cookie_header, CookieSet, CredentialStore};
use super::politeness::{origin_of, ComplianceGate};
use crate::config::{DispatchConfig, DEFAULT_USER_AGENT};

const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Errors that can occur while dispatching a request
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("URL not allowed by robots.txt: {0}")]
    PolicyDenied(String),
    #[error("Request quota of {limit} exhausted for {origin}")]
    QuotaExceeded { origin: String, limit: u64 },
    #[error("Fetching {url} failed after {attempts} attempts: {reason}")]
    FetchFailed {
        url: String,
        attempts: u32,
        reason: String,
    },
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl DispatchError {
    /// Compliance and quota refusals are final; everything else may be worked around
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::PolicyDenied(_) | Self::QuotaExceeded { .. })
    }
}

/// Per-call request extras
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers (override the defaults)
    pub headers: BTreeMap<String, String>,
    /// Cookies merged over the stored ones for the host
    pub cookies: CookieSet,
    /// Query parameters appended to the URL
    pub params: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn cookies(mut self, cookies: CookieSet) -> Self {
        self.cookies.extend(cookies);
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }
}

/// POST payload
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// `application/json`
    Json(serde_json::Value),
}

/// Runtime configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Spacing used when robots.txt gives no crawl-delay
    pub base_delay: Duration,
    /// Jitter range added to every wait
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before retry n is `backoff_unit * (2^n + U(0,1))`
    pub backoff_unit: Duration,
    /// Requests allowed per origin
    pub max_pages_per_origin: u64,
    /// Request timeout
    pub timeout: Duration,
    /// Hosts that skip compliance and throttling (substring match)
    pub exempt_hosts: Vec<String>,
    /// User-agent pool
    pub user_agents: Vec<String>,
    /// Accept-Language header
    pub accept_language: String,
}

impl FetchConfig {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            jitter_min: Duration::from_millis(config.jitter_min_ms),
            jitter_max: Duration::from_millis(config.jitter_max_ms),
            max_retries: config.max_retries,
            backoff_unit: Duration::from_millis(config.backoff_unit_ms),
            max_pages_per_origin: config.max_pages_per_origin,
            timeout: Duration::from_secs(config.request_timeout_secs),
            exempt_hosts: config.exempt_hosts.clone(),
            user_agents: config.user_agents.clone(),
            accept_language: config.accept_language.clone(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

/// Per-origin request bookkeeping
#[derive(Debug, Default)]
pub struct OriginQuota {
    /// Requests admitted or refused so far
    pub count: u64,
    /// When the last admitted request left the spacing gate
    pub last_request: Option<Instant>,
}

/// Snapshot of dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Transfers attempted (including retries)
    pub requests_sent: u64,
    /// Retries performed
    pub retries: u64,
    /// Calls that ended in `FetchFailed`
    pub failures: u64,
    /// Calls refused by robots.txt
    pub policy_denials: u64,
    /// Calls refused by the origin quota
    pub quota_rejections: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests_sent: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    policy_denials: AtomicU64,
    quota_rejections: AtomicU64,
}

/// Robots-aware, throttled HTTP dispatcher
pub struct Dispatcher {
    http_client: reqwest::Client,
    config: FetchConfig,
    gate: Arc<ComplianceGate>,
    credentials: Arc<CredentialStore>,
    quotas: DashMap<String, Arc<Mutex<OriginQuota>>>,
    counters: Counters,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(
        config: FetchConfig,
        gate: Arc<ComplianceGate>,
        credentials: Arc<CredentialStore>,
    ) -> Result<Self, DispatchError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            http_client,
            config,
            gate,
            credentials,
            quotas: DashMap::new(),
            counters: Counters::default(),
        })
    }

    /// GET `url` through the full pre-flight sequence
    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Response, DispatchError> {
        let url = parse_url(url)?;
        self.preflight(&url).await?;
        self.send_with_retry(Method::GET, &url, None, &options).await
    }

    /// POST `body` to `url` through the full pre-flight sequence
    pub async fn post(
        &self,
        url: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<Response, DispatchError> {
        let url = parse_url(url)?;
        self.preflight(&url).await?;
        self.send_with_retry(Method::POST, &url, Some(&body), &options)
            .await
    }

    /// Requests counted against an origin so far
    pub async fn origin_requests(&self, origin: &str) -> u64 {
        let Some(quota) = self.quotas.get(origin).map(|q| Arc::clone(q.value())) else {
            return 0;
        };
        let count = quota.lock().await.count;
        count
    }

    /// Counter snapshot
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            requests_sent: self.counters.requests_sent.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            policy_denials: self.counters.policy_denials.load(Ordering::Relaxed),
            quota_rejections: self.counters.quota_rejections.load(Ordering::Relaxed),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    fn is_exempt(&self, host: &str) -> bool {
        self.config
            .exempt_hosts
            .iter()
            .any(|exempt| !exempt.is_empty() && host.contains(exempt.as_str()))
    }

    async fn preflight(&self, url: &Url) -> Result<(), DispatchError> {
        let host = url.host_str().unwrap_or_default();
        if self.is_exempt(host) {
            tracing::debug!("{} is exempt from compliance and throttling", host);
            return Ok(());
        }

        if !self.gate.is_allowed(url).await {
            self.counters.policy_denials.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Blocked by robots.txt: {}", url);
            return Err(DispatchError::PolicyDenied(url.to_string()));
        }

        let origin = origin_of(url).ok_or_else(|| DispatchError::InvalidUrl(url.to_string()))?;
        let crawl_delay = self.gate.crawl_delay(url).await;

        let quota = self
            .quotas
            .entry(origin.clone())
            .or_insert_with(|| Arc::new(Mutex::new(OriginQuota::default())))
            .clone();
        let mut quota = quota.lock().await;

        quota.count += 1;
        if quota.count > self.config.max_pages_per_origin {
            self.counters.quota_rejections.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Quota of {} requests reached for {}",
                self.config.max_pages_per_origin,
                origin
            );
            return Err(DispatchError::QuotaExceeded {
                origin,
                limit: self.config.max_pages_per_origin,
            });
        }

        let effective_delay = crawl_delay
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(self.config.base_delay);
        let wait = quota
            .last_request
            .map(|last| effective_delay.saturating_sub(last.elapsed()))
            .unwrap_or(Duration::ZERO);
        let total = wait + self.jitter();

        if !total.is_zero() {
            tracing::debug!("Waiting {:?} before requesting {}", total, url);
            tokio::time::sleep(total).await;
        }
        quota.last_request = Some(Instant::now());

        Ok(())
    }

    async fn send_with_retry(
        &self,
        method: Method,
        url: &Url,
        body: Option<&RequestBody>,
        options: &RequestOptions,
    ) -> Result<Response, DispatchError> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.backoff(attempt);
                self.counters.retries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Retrying {} in {:?} (attempt {}/{}): {}",
                    url,
                    backoff,
                    attempt + 1,
                    attempts,
                    last_error
                );
                tokio::time::sleep(backoff).await;
            }

            let request = self.build_request(method.clone(), url, body, options);
            self.counters.requests_sent.fetch_add(1, Ordering::Relaxed);

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!("{} {} -> {}", method, url, response.status());
                    return Ok(response);
                }
                Ok(response) => {
                    last_error = format!("HTTP status {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
        }

        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!("Giving up on {} after {} attempts: {}", url, attempts, last_error);
        Err(DispatchError::FetchFailed {
            url: url.to_string(),
            attempts,
            reason: last_error,
        })
    }

    fn build_request(
        &self,
        method: Method,
        url: &Url,
        body: Option<&RequestBody>,
        options: &RequestOptions,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .http_client
            .request(method, url.clone())
            .header(USER_AGENT, self.pick_user_agent())
            .header(ACCEPT, DEFAULT_ACCEPT)
            .header(ACCEPT_LANGUAGE, self.config.accept_language.as_str());

        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if !options.params.is_empty() {
            request = request.query(&options.params);
        }

        let mut cookies = self
            .credentials
            .cookies_for_host(url.host_str().unwrap_or_default());
        cookies.extend(options.cookies.iter().map(|(k, v)| (k.clone(), v.clone())));
        if !cookies.is_empty() {
            request = request.header(COOKIE, cookie_header(&cookies));
        }

        match body {
            Some(RequestBody::Form(fields)) => request.form(fields),
            Some(RequestBody::Json(value)) => request.json(value),
            None => request,
        }
    }

    fn pick_user_agent(&self) -> String {
        self.config
            .user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    fn jitter(&self) -> Duration {
        let min = self.config.jitter_min.as_millis() as u64;
        let max = self.config.jitter_max.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt as i32) + rand::thread_rng().gen_range(0.0..1.0);
        self.config.backoff_unit.mul_f64(factor)
    }
}

fn parse_url(url: &str) -> Result<Url, DispatchError> {
    let parsed = Url::parse(url).map_err(|e| DispatchError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(DispatchError::InvalidUrl(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::credentials::parse_cookie_header;
    use crate::scraping::politeness::PolitenessConfig;
    use httpmock::prelude::*;

    fn fast_config() -> FetchConfig {
        FetchConfig {
            base_delay: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
            max_retries: 2,
            backoff_unit: Duration::from_millis(1),
            max_pages_per_origin: 100,
            timeout: Duration::from_secs(5),
            exempt_hosts: Vec::new(),
            user_agents: vec!["TestAgent/1.0".to_string()],
            accept_language: "en".to_string(),
        }
    }

    fn dispatcher(config: FetchConfig) -> Dispatcher {
        let gate = Arc::new(ComplianceGate::new(PolitenessConfig::default()));
        Dispatcher::new(config, gate, Arc::new(CredentialStore::in_memory())).unwrap()
    }

    #[tokio::test]
    async fn test_get_sends_identity_headers() {
        let server = MockServer::start_async().await;
        let page = server.mock(|when, then| {
            when.method(GET)
                .path("/page")
                .query_param("q", "1")
                .header("user-agent", "TestAgent/1.0")
                .header("accept-language", "en")
                .header("x-extra", "yes");
            then.status(200).body("ok");
        });

        let dispatcher = dispatcher(fast_config());
        let options = RequestOptions::new().header("X-Extra", "yes").param("q", "1");
        let response = dispatcher.get(&server.url("/page"), options).await.unwrap();

        assert_eq!(response.text().await.unwrap(), "ok");
        page.assert();
    }

    #[tokio::test]
    async fn test_policy_denied_sends_nothing() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/robots.txt");
            then.status(200).body("User-agent: *\nDisallow: /private\n");
        });
        let page = server.mock(|when, then| {
            when.method(GET).path("/private/page");
            then.status(200);
        });

        let dispatcher = dispatcher(fast_config());
        let err = dispatcher
            .get(&server.url("/private/page"), RequestOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::PolicyDenied(_)));
        assert!(err.is_refusal());
        page.assert_calls(0);
        assert_eq!(dispatcher.stats().policy_denials, 1);
    }

    #[tokio::test]
    async fn test_quota_exceeded_stops_transfers() {
        let server = MockServer::start_async().await;
        let page = server.mock(|when, then| {
            when.method(GET).path("/page");
            then.status(200);
        });

        let dispatcher = dispatcher(FetchConfig {
            max_pages_per_origin: 2,
            ..fast_config()
        });

        for _ in 0..2 {
            dispatcher.get(&server.url("/page"), RequestOptions::new()).await.unwrap();
        }
        let err = dispatcher
            .get(&server.url("/page"), RequestOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::QuotaExceeded { limit: 2, .. }));
        page.assert_calls(2);
        assert_eq!(dispatcher.origin_requests(&server.base_url()).await, 3);
    }

    #[tokio::test]
    async fn test_spacing_respects_base_delay() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/page");
            then.status(200);
        });

        let dispatcher = dispatcher(FetchConfig {
            base_delay: Duration::from_millis(250),
            ..fast_config()
        });

        let start = std::time::Instant::now();
        dispatcher.get(&server.url("/page"), RequestOptions::new()).await.unwrap();
        let first_done = start.elapsed();
        dispatcher.get(&server.url("/page"), RequestOptions::new()).await.unwrap();

        // First request to an origin does not wait
        assert!(first_done < Duration::from_millis(250));
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_crawl_delay_overrides_base_delay() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/robots.txt");
            then.status(200).body("User-agent: *\nCrawl-delay: 0.3\n");
        });
        server.mock(|when, then| {
            when.method(GET).path("/page");
            then.status(200);
        });

        let dispatcher = dispatcher(fast_config());

        let start = std::time::Instant::now();
        dispatcher.get(&server.url("/page"), RequestOptions::new()).await.unwrap();
        dispatcher.get(&server.url("/page"), RequestOptions::new()).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retries_then_fails() {
        let server = MockServer::start_async().await;
        let page = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(503);
        });

        let dispatcher = dispatcher(fast_config());
        let err = dispatcher
            .get(&server.url("/flaky"), RequestOptions::new())
            .await
            .unwrap_err();

        match err {
            DispatchError::FetchFailed { attempts, reason, .. } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("503"));
            }
            other => panic!("unexpected error: {other}"),
        }
        page.assert_calls(3);

        let stats = dispatcher.stats();
        assert_eq!(stats.requests_sent, 3);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn test_cookies_merge_with_call_override() {
        let server = MockServer::start_async().await;
        let page = server.mock(|when, then| {
            when.method(GET)
                .path("/page")
                .header("cookie", "lang=en; sid=override; theme=dark");
            then.status(200);
        });

        let store = Arc::new(CredentialStore::in_memory());
        store.insert("127.0.0.1", parse_cookie_header("sid=stored; theme=dark"));
        let gate = Arc::new(ComplianceGate::new(PolitenessConfig::default()));
        let dispatcher = Dispatcher::new(fast_config(), gate, store).unwrap();

        let options = RequestOptions::new().cookies(parse_cookie_header("sid=override; lang=en"));
        dispatcher.get(&server.url("/page"), options).await.unwrap();
        page.assert();
    }

    #[tokio::test]
    async fn test_post_form_uses_same_preflight() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/robots.txt");
            then.status(200).body("User-agent: *\nDisallow: /blocked\n");
        });
        let submit = server.mock(|when, then| {
            when.method(POST).path("/submit").body("a=1&b=two");
            then.status(200);
        });

        let dispatcher = dispatcher(fast_config());
        let body = RequestBody::Form(vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "two".to_string()),
        ]);
        dispatcher
            .post(&server.url("/submit"), body, RequestOptions::new())
            .await
            .unwrap();
        submit.assert();

        let denied = dispatcher
            .post(
                &server.url("/blocked"),
                RequestBody::Json(serde_json::json!({"a": 1})),
                RequestOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(denied, DispatchError::PolicyDenied(_)));
    }

    #[tokio::test]
    async fn test_exempt_hosts_skip_compliance_and_quota() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/robots.txt");
            then.status(200).body("User-agent: *\nDisallow: /\n");
        });
        let page = server.mock(|when, then| {
            when.method(GET).path("/page");
            then.status(200);
        });

        let dispatcher = dispatcher(FetchConfig {
            exempt_hosts: vec!["127.0.0.1".to_string()],
            max_pages_per_origin: 1,
            ..fast_config()
        });

        for _ in 0..3 {
            dispatcher.get(&server.url("/page"), RequestOptions::new()).await.unwrap();
        }
        page.assert_calls(3);
    }

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let dispatcher = dispatcher(fast_config());
        for bad in ["not a url", "ftp://example.org/file", "file:///etc/passwd"] {
            let err = dispatcher.get(bad, RequestOptions::new()).await.unwrap_err();
            assert!(matches!(err, DispatchError::InvalidUrl(_)), "{bad}");
        }
    }

    #[test]
    fn test_empty_agent_pool_falls_back() {
        let dispatcher = dispatcher(FetchConfig {
            user_agents: Vec::new(),
            ..fast_config()
        });
        assert_eq!(dispatcher.pick_user_agent(), DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let dispatcher = dispatcher(FetchConfig {
            backoff_unit: Duration::from_millis(100),
            ..fast_config()
        });
        let first = dispatcher.backoff(1);
        let third = dispatcher.backoff(3);
        assert!(first >= Duration::from_millis(200) && first < Duration::from_millis(300));
        assert!(third >= Duration::from_millis(800) && third < Duration::from_millis(900));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_share_origin_quota_and_spacing() {
        let server = MockServer::start_async().await;
        let page = server.mock(|when, then| {
            when.method(GET).path("/page");
            then.status(200);
        });

        let dispatcher = Arc::new(dispatcher(FetchConfig {
            base_delay: Duration::from_millis(50),
            max_pages_per_origin: 5,
            ..fast_config()
        }));

        let start = std::time::Instant::now();
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                let url = server.url("/page");
                tokio::spawn(async move { dispatcher.get(&url, RequestOptions::new()).await })
            })
            .collect();
        let results = futures::future::join_all(tasks).await;
        let elapsed = start.elapsed();

        let ok = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(DispatchError::QuotaExceeded { limit: 5, .. }))))
            .count();
        assert_eq!(ok, 5);
        assert_eq!(refused, 5);
        page.assert_calls(5);
        assert_eq!(dispatcher.origin_requests(&server.base_url()).await, 10);
        assert_eq!(dispatcher.stats().quota_rejections, 5);
        // Five admitted requests are spaced by four base delays
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    }
}
