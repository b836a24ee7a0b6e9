//! Configuration module for the onion crawler
//!
//! This module handles loading, parsing, and validating the optional TOML
//! configuration file. Every setting has a default, so the crawler also runs
//! without one.
//!
//! # Example
//!
//! ```no_run
//! use onion_crawler::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawler.toml")).unwrap();
//! println!("Snapshot every {}s", config.persistence.snapshot_interval_secs);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CrawlerConfig, PathsConfig, PersistenceConfig, DEFAULT_PROXY_URL, DEFAULT_USER_AGENT,
};

pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, load_or_default, parse_config,
};

pub use validation::{validate_thread_count, MAX_THREAD_COUNT};
