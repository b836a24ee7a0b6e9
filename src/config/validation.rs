use crate::config::types::{Config, CrawlerConfig, PathsConfig, PersistenceConfig};
use crate::ConfigError;
use std::path::Path;
use url::Url;

/// Largest number of worker threads a crawl may run
pub const MAX_THREAD_COUNT: u16 = 100;

/// Proxy schemes reqwest can route through
const PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_paths_config(&config.paths)?;
    validate_persistence_config(&config.persistence)?;
    Ok(())
}

/// Rejects worker counts outside `1..=MAX_THREAD_COUNT`
pub fn validate_thread_count(count: usize) -> Result<u16, ConfigError> {
    if count < 1 || count > usize::from(MAX_THREAD_COUNT) {
        return Err(ConfigError::Validation(format!(
            "thread count must be between 1 and {}, got {}",
            MAX_THREAD_COUNT, count
        )));
    }
    Ok(count as u16)
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if let Some(proxy) = config.proxy() {
        let url = Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy-url '{}': {}", proxy, e)))?;

        if !PROXY_SCHEMES.contains(&url.scheme()) {
            return Err(ConfigError::Validation(format!(
                "proxy-url scheme must be one of {}, got '{}'",
                PROXY_SCHEMES.join(", "),
                url.scheme()
            )));
        }
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.max_content_length == 0 {
        return Err(ConfigError::Validation(
            "max-content-length must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_paths_config(config: &PathsConfig) -> Result<(), ConfigError> {
    validate_path("data-dir", &config.data_dir)?;
    validate_path("queue-dir", &config.queue_dir)?;
    validate_path("seeds-file", &config.seeds_file)?;
    validate_path("cookies-file", &config.cookies_file)?;
    Ok(())
}

fn validate_path(name: &str, path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
    }
    Ok(())
}

fn validate_persistence_config(config: &PersistenceConfig) -> Result<(), ConfigError> {
    if config.snapshot_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "snapshot-interval-secs must be >= 1".to_string(),
        ));
    }
    Ok(())
}
