use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Proxy of a local Tor setup (Privoxy in front of the Tor SOCKS port)
pub const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:8118";

/// User agent of the Tor Browser, so the crawler blends in with regular visitors
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; rv:78.0) Gecko/20100101 Firefox/78.0";

/// Main configuration structure for the onion crawler
///
/// Every section is optional; a missing file or section falls back to the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub paths: PathsConfig,
    pub persistence: PersistenceConfig,
}

/// Fetching behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Proxy all requests go through; `"none"` connects directly
    #[serde(rename = "proxy-url")]
    pub proxy_url: String,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Whole-request timeout in seconds
    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// Page text is truncated to this many characters
    #[serde(rename = "max-content-length")]
    pub max_content_length: usize,
}

impl CrawlerConfig {
    /// Returns the proxy URL, or None when proxying is disabled
    pub fn proxy(&self) -> Option<&str> {
        let proxy = self.proxy_url.trim();
        if proxy.is_empty() || proxy.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(proxy)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 100,
            max_content_length: 65_536,
        }
    }
}

/// Locations of everything the crawler reads and writes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for the archive database and the status files
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,

    /// Directory holding the queue's segment logs
    #[serde(rename = "queue-dir")]
    pub queue_dir: PathBuf,

    /// Seed URLs, one per line
    #[serde(rename = "seeds-file")]
    pub seeds_file: PathBuf,

    /// Per-domain cookie table
    #[serde(rename = "cookies-file")]
    pub cookies_file: PathBuf,
}

impl PathsConfig {
    /// SQLite crawl archive
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("crawl.db")
    }

    /// Human-readable status report
    pub fn status_path(&self) -> PathBuf {
        self.data_dir.join("crawl_status.txt")
    }

    /// Statistics recovery record read back by restore mode
    pub fn recovery_path(&self) -> PathBuf {
        self.data_dir.join("crawl_status.toml")
    }

    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            queue_dir: PathBuf::from("data/persistentRoundRobinQueue"),
            seeds_file: PathBuf::from("resources/seeds.txt"),
            cookies_file: PathBuf::from("resources/cookies.toml"),
        }
    }
}

/// Periodic snapshot settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Seconds between two snapshots
    #[serde(rename = "snapshot-interval-secs")]
    pub snapshot_interval_secs: u64,
}

impl PersistenceConfig {
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 10,
        }
    }
}
