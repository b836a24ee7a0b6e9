//! Storage traits and error types
//!
//! This module defines the trait interface for the crawl archive and
//! associated error types.

use crate::crawler::PageContent;
use crate::storage::{RunMode, RunRecord, RunStatus};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Invalid value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for crawl archive implementations
///
/// The archive is write-mostly: workers record pages and failures, the
/// snapshotter flushes discovered URLs, and restore mode reads the
/// discovered set back.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `mode` - Whether the run started a fresh crawl or restored one
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, mode: RunMode, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Sets the final status and finish timestamp of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Discovered URLs =====

    /// Saves a batch of discovered URLs, ignoring ones already stored
    ///
    /// # Returns
    ///
    /// The number of URLs that were new to the archive
    fn save_discovered(&mut self, urls: &[String]) -> StorageResult<usize>;

    /// Loads every discovered URL
    fn load_discovered(&self) -> StorageResult<Vec<String>>;

    fn count_discovered(&self) -> StorageResult<u64>;

    /// Forgets every discovered URL, for a crawl started from scratch
    fn clear_discovered(&mut self) -> StorageResult<()>;

    // ===== Fetch Results =====

    /// Archives a successfully fetched page together with its outgoing links
    fn record_page(&mut self, run_id: i64, page: &PageContent) -> StorageResult<()>;

    /// Loads every archived `(page URL, link URL)` edge, in archive order
    fn load_link_edges(&self) -> StorageResult<Vec<(String, String)>>;

    fn count_page_links(&self) -> StorageResult<u64>;

    /// Archives a failed fetch
    fn record_fetch_error(&mut self, run_id: i64, url: &str, error: &str) -> StorageResult<()>;

    fn count_pages(&self) -> StorageResult<u64>;

    fn count_fetch_errors(&self) -> StorageResult<u64>;
}
