//! Output module for crawl statistics and status reports
//!
//! This module handles:
//! - Live counters shared by workers and the snapshotter
//! - The TOML recovery record used by restore mode
//! - The human-readable status report

pub mod stats;

pub use stats::{
    load_recovery, write_atomic, CrawlStatistics, StatisticsRecord, StatusReport,
};
