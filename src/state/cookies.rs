use crate::url::{domain_key, extract_domain};
use crate::CrawlerError;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use url::Url;

/// Cookies to send, keyed by domain key
///
/// Some hidden services only serve content after a login or a captcha; their
/// session cookies can be supplied in a TOML file:
///
/// ```toml
/// ["example.onion"]
/// session = "abc123"
/// lang = "en"
/// ```
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    by_domain: HashMap<String, BTreeMap<String, String>>,
}

impl CookieJar {
    /// A jar that never sends anything
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads a cookie table from a TOML file
    pub fn load(path: &Path) -> Result<Self, CrawlerError> {
        let content = std::fs::read_to_string(path)?;
        let jar = Self::parse(&content).map_err(|source| CrawlerError::TomlParse {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(
            "Loaded cookies for {} domains from {}",
            jar.len(),
            path.display()
        );
        Ok(jar)
    }

    /// Parses a cookie table; domain names are reduced to their domain key
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let table: HashMap<String, BTreeMap<String, String>> = toml::from_str(content)?;

        let mut by_domain: HashMap<String, BTreeMap<String, String>> = HashMap::new();
        for (domain, cookies) in table {
            by_domain
                .entry(normalize_domain(&domain))
                .or_default()
                .extend(cookies);
        }

        Ok(Self { by_domain })
    }

    /// Value of the `Cookie` header for `url`, if its domain has cookies
    pub fn header_for(&self, url: &str) -> Option<String> {
        let cookies = self.by_domain.get(&domain_key(url))?;
        if cookies.is_empty() {
            return None;
        }

        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Number of domains with cookies
    pub fn len(&self) -> usize {
        self.by_domain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_domain.is_empty()
    }
}

/// Accepts either a bare host or a full URL as the table key
fn normalize_domain(domain: &str) -> String {
    let as_url = format!("http://{}/", domain.trim());
    Url::parse(&as_url)
        .ok()
        .and_then(|url| extract_domain(&url))
        .unwrap_or_else(|| domain.trim().to_lowercase())
}
