//! Crawler module for page fetching and crawl orchestration
//!
//! This module contains the crawling logic built on top of the fair queue:
//! - HTTP fetching through the Tor proxy
//! - HTML parsing and link extraction
//! - The per-thread worker loop
//! - Periodic snapshots of crawl progress
//! - Overall crawl coordination

mod coordinator;
mod fetcher;
mod parser;
mod snapshot;
mod worker;

pub use coordinator::{load_seeds, run_crawl, Coordinator, CrawlMode, CrawlOptions};
pub use fetcher::{build_http_client, fetch_page, FetchResult, PageContent};
pub use parser::{parse_html, ParsedPage};
pub use snapshot::Snapshotter;
pub use worker::{admit_links, run_worker, WorkerContext};
