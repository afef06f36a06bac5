//! Session cookie storage
//!
//! Cookies are kept per domain in memory and optionally persisted as one flat
//! JSON object per domain (`www.bilibili.com` -> `www_bilibili_com.json`).
//! Older installs kept a `k=v; k2=v2` header string in `<site>.txt`; that
//! format is still read when no JSON file exists.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Cookie name -> value, ordered so the `Cookie` header is deterministic
pub type CookieSet = BTreeMap<String, String>;

/// Errors raised while reading or writing cookies
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Cookie file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed cookie file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Credential provider failed for {domain}: {reason}")]
    Provider { domain: String, reason: String },
}

/// Something able to obtain a fresh cookie set for a domain (e.g. a login flow)
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self, domain: &str) -> Result<CookieSet, CredentialError>;
}

/// Parse a `k=v; k2=v2` header string
pub fn parse_cookie_header(header: &str) -> CookieSet {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Render a cookie set as a `Cookie` header value
pub fn cookie_header(cookies: &CookieSet) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Domain-keyed cookie store shared between the dispatcher and site strategies
#[derive(Debug, Default)]
pub struct CredentialStore {
    cookies_dir: Option<PathBuf>,
    cookies: DashMap<String, CookieSet>,
}

impl CredentialStore {
    /// Store backed by `cookies_dir`
    pub fn new(cookies_dir: impl Into<PathBuf>) -> Self {
        Self {
            cookies_dir: Some(cookies_dir.into()),
            cookies: DashMap::new(),
        }
    }

    /// Store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Persisted file name for a domain
    pub fn file_name(domain: &str) -> String {
        format!("{}.json", normalize_domain(domain).replace('.', "_"))
    }

    /// Replace the in-memory cookies of a domain
    pub fn insert(&self, domain: &str, cookies: CookieSet) {
        self.cookies.insert(normalize_domain(domain), cookies);
    }

    /// Cookies for a domain: memory first, then the JSON file, then the legacy text file.
    ///
    /// Anything found on disk is cached in memory.
    pub fn load(&self, domain: &str) -> Result<Option<CookieSet>, CredentialError> {
        let domain = normalize_domain(domain);
        if let Some(cookies) = self.cookies.get(&domain) {
            return Ok(Some(cookies.clone()));
        }

        let Some(dir) = &self.cookies_dir else {
            return Ok(None);
        };

        let json_path = dir.join(Self::file_name(&domain));
        let loaded = if json_path.exists() {
            let content = std::fs::read_to_string(&json_path)?;
            let cookies: CookieSet =
                serde_json::from_str(&content).map_err(|source| CredentialError::Parse {
                    path: json_path.clone(),
                    source,
                })?;
            tracing::debug!("Loaded {} cookies from {}", cookies.len(), json_path.display());
            Some(cookies)
        } else {
            let legacy_path = dir.join(format!("{}.txt", site_name(&domain)));
            if legacy_path.exists() {
                let content = std::fs::read_to_string(&legacy_path)?;
                let cookies = parse_cookie_header(content.trim());
                tracing::debug!(
                    "Loaded {} cookies from legacy file {}",
                    cookies.len(),
                    legacy_path.display()
                );
                Some(cookies)
            } else {
                None
            }
        };

        if let Some(cookies) = &loaded {
            if !cookies.is_empty() {
                self.cookies.insert(domain, cookies.clone());
            }
        }

        Ok(loaded.filter(|c| !c.is_empty()))
    }

    /// Persist a domain's cookies and keep them in memory. Returns the file written.
    pub fn save(&self, domain: &str, cookies: &CookieSet) -> Result<Option<PathBuf>, CredentialError> {
        let domain = normalize_domain(domain);
        self.cookies.insert(domain.clone(), cookies.clone());

        let Some(dir) = &self.cookies_dir else {
            return Ok(None);
        };

        std::fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(&domain));
        let content = serde_json::to_string_pretty(cookies).map_err(|source| CredentialError::Parse {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, content)?;

        tracing::info!("Saved {} cookies for {} to {}", cookies.len(), domain, path.display());
        Ok(Some(path))
    }

    /// Acquire fresh cookies from a provider and persist them
    pub async fn refresh(
        &self,
        domain: &str,
        provider: &dyn CredentialProvider,
    ) -> Result<CookieSet, CredentialError> {
        let cookies = provider.acquire(domain).await?;
        self.save(domain, &cookies)?;
        Ok(cookies)
    }

    /// All in-memory cookies that apply to `host` (exact domain or parent domain).
    ///
    /// More specific domains win on name clashes.
    pub fn cookies_for_host(&self, host: &str) -> CookieSet {
        let host = normalize_domain(host);
        let mut matching: Vec<(usize, CookieSet)> = self
            .cookies
            .iter()
            .filter(|entry| domain_matches(&host, entry.key()))
            .map(|entry| (entry.key().len(), entry.value().clone()))
            .collect();
        matching.sort_by_key(|(len, _)| *len);

        let mut merged = CookieSet::new();
        for (_, cookies) in matching {
            merged.extend(cookies);
        }
        merged
    }

    /// Domains with cookies in memory
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.cookies.iter().map(|e| e.key().clone()).collect();
        domains.sort();
        domains
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_lowercase()
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// `www.bilibili.com` -> `bilibili`
fn site_name(domain: &str) -> &str {
    let domain = domain.strip_prefix("www.").unwrap_or(domain);
    domain.split('.').next().unwrap_or(domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl CredentialProvider for FixedProvider {
        async fn acquire(&self, _domain: &str) -> Result<CookieSet, CredentialError> {
            Ok(parse_cookie_header("SESSDATA=fresh; bili_jct=token"))
        }
    }

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header("SESSDATA=abc; bili_jct=def ;  ; broken; k=v=w");
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies["SESSDATA"], "abc");
        assert_eq!(cookies["bili_jct"], "def");
        assert_eq!(cookies["k"], "v=w");
        assert_eq!(cookie_header(&cookies), "SESSDATA=abc; bili_jct=def; k=v=w");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(CredentialStore::file_name("www.bilibili.com"), "www_bilibili_com.json");
        assert_eq!(CredentialStore::file_name(".Bilibili.com"), "bilibili_com.json");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let cookies = parse_cookie_header("a=1; b=2");

        let path = store.save("bilibili.com", &cookies).unwrap().unwrap();
        assert!(path.ends_with("bilibili_com.json"));

        let fresh = CredentialStore::new(dir.path());
        assert_eq!(fresh.load("bilibili.com").unwrap(), Some(cookies));
        assert_eq!(fresh.domains(), vec!["bilibili.com".to_string()]);
    }

    #[test]
    fn test_legacy_text_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bilibili.txt"), "SESSDATA=xyz; buvid3=123\n").unwrap();

        let store = CredentialStore::new(dir.path());
        let cookies = store.load("www.bilibili.com").unwrap().unwrap();
        assert_eq!(cookies["SESSDATA"], "xyz");
        assert_eq!(cookies["buvid3"], "123");
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        assert!(store.load("nowhere.org").unwrap().is_none());

        std::fs::write(dir.path().join("broken_org.json"), "not json").unwrap();
        assert!(matches!(
            store.load("broken.org"),
            Err(CredentialError::Parse { .. })
        ));
    }

    #[test]
    fn test_cookies_for_host_merges_parent_domains() {
        let store = CredentialStore::in_memory();
        store.insert("bilibili.com", parse_cookie_header("shared=parent; p=1"));
        store.insert("www.bilibili.com", parse_cookie_header("shared=child"));
        store.insert("other.com", parse_cookie_header("x=y"));

        let cookies = store.cookies_for_host("www.bilibili.com");
        assert_eq!(cookies["shared"], "child");
        assert_eq!(cookies["p"], "1");
        assert!(!cookies.contains_key("x"));

        // Suffix without a dot boundary does not match
        assert!(store.cookies_for_host("notbilibili.com").is_empty());
    }

    #[tokio::test]
    async fn test_refresh_from_provider_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());

        let cookies = store.refresh("bilibili.com", &FixedProvider).await.unwrap();
        assert_eq!(cookies["SESSDATA"], "fresh");
        assert!(dir.path().join("bilibili_com.json").exists());
        assert_eq!(store.cookies_for_host("api.bilibili.com")["bili_jct"], "token");
    }
}
