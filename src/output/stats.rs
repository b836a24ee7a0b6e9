//! Live crawl statistics
//!
//! This module provides the process-wide counters workers report into, the
//! TOML recovery record restore mode reads back, and the human-readable status
//! report written next to it.

use crate::queue::QueueMetrics;
use crate::CrawlerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared counters for one crawl
///
/// Queue gauges (size, domains, utilization) are read live through
/// [`QueueMetrics`] rather than copied.
pub struct CrawlStatistics {
    pages_fetched: AtomicU64,
    fetch_errors: AtomicU64,
    urls_discovered: AtomicU64,
    fetched_per_thread: Vec<AtomicU64>,
    errors_per_thread: Vec<AtomicU64>,
    started: Instant,
    /// Crawl time accumulated by previous runs of a restored crawl
    previous_time: Duration,
    queue: Arc<dyn QueueMetrics>,
}

impl CrawlStatistics {
    /// Fresh statistics for a crawl with `thread_count` workers
    pub fn new(queue: Arc<dyn QueueMetrics>, thread_count: u16) -> Self {
        let per_thread = || (0..thread_count).map(|_| AtomicU64::new(0)).collect();

        Self {
            pages_fetched: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            urls_discovered: AtomicU64::new(0),
            fetched_per_thread: per_thread(),
            errors_per_thread: per_thread(),
            started: Instant::now(),
            previous_time: Duration::ZERO,
            queue,
        }
    }

    /// Statistics continuing from a recovery record
    pub fn from_record(queue: Arc<dyn QueueMetrics>, record: &StatisticsRecord) -> Self {
        let per_thread = |saved: &[u64]| {
            (0..usize::from(record.thread_count))
                .map(|i| AtomicU64::new(saved.get(i).copied().unwrap_or(0)))
                .collect()
        };

        Self {
            pages_fetched: AtomicU64::new(record.pages_fetched),
            fetch_errors: AtomicU64::new(record.fetch_errors),
            urls_discovered: AtomicU64::new(record.urls_discovered),
            fetched_per_thread: per_thread(&record.fetched_per_thread),
            errors_per_thread: per_thread(&record.errors_per_thread),
            started: Instant::now(),
            previous_time: Duration::from_secs(record.crawl_time_secs),
            queue,
        }
    }

    pub fn thread_count(&self) -> u16 {
        self.fetched_per_thread.len() as u16
    }

    /// Counts a page fetched by `worker`
    pub fn record_success(&self, worker: usize) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
        bump(&self.fetched_per_thread, worker);
    }

    /// Counts a failed fetch by `worker`
    pub fn record_failure(&self, worker: usize) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
        bump(&self.errors_per_thread, worker);
    }

    /// Counts URLs that passed the filter and were queued for the first time
    pub fn record_discovered(&self, count: u64) {
        self.urls_discovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched.load(Ordering::Relaxed)
    }

    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.load(Ordering::Relaxed)
    }

    pub fn urls_discovered(&self) -> u64 {
        self.urls_discovered.load(Ordering::Relaxed)
    }

    /// Total crawl time, including earlier runs of a restored crawl
    pub fn crawl_time(&self) -> Duration {
        self.previous_time + self.started.elapsed()
    }

    /// Serializable copy of the counters
    pub fn to_record(&self) -> StatisticsRecord {
        StatisticsRecord {
            thread_count: self.thread_count(),
            pages_fetched: self.pages_fetched(),
            fetch_errors: self.fetch_errors(),
            urls_discovered: self.urls_discovered(),
            fetched_per_thread: load_all(&self.fetched_per_thread),
            errors_per_thread: load_all(&self.errors_per_thread),
            crawl_time_secs: self.crawl_time().as_secs(),
            saved_at: Utc::now(),
        }
    }

    /// Point-in-time status, combining counters and queue gauges
    pub fn report(&self) -> StatusReport {
        StatusReport {
            thread_count: self.thread_count(),
            queue_size: self.queue.len(),
            pages_fetched: self.pages_fetched(),
            fetch_errors: self.fetch_errors(),
            domains_discovered: self.queue.domains_discovered(),
            urls_discovered: self.urls_discovered(),
            subqueue_utilization: self.queue.subqueue_utilization(),
            fetched_per_thread: load_all(&self.fetched_per_thread),
            crawl_time: self.crawl_time(),
        }
    }

    /// Atomically writes the recovery record as TOML
    pub fn save_recovery(&self, path: &Path) -> Result<(), CrawlerError> {
        let content = toml::to_string_pretty(&self.to_record())?;
        write_atomic(path, content.as_bytes())
    }
}

impl fmt::Debug for CrawlStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlStatistics")
            .field("thread_count", &self.thread_count())
            .field("pages_fetched", &self.pages_fetched())
            .field("fetch_errors", &self.fetch_errors())
            .field("urls_discovered", &self.urls_discovered())
            .finish()
    }
}

fn bump(counters: &[AtomicU64], worker: usize) {
    match counters.get(worker) {
        Some(counter) => {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        None => tracing::warn!("No per-thread counter for worker {}", worker),
    }
}

fn load_all(counters: &[AtomicU64]) -> Vec<u64> {
    counters.iter().map(|c| c.load(Ordering::Relaxed)).collect()
}

/// Counters persisted between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatisticsRecord {
    pub thread_count: u16,
    pub pages_fetched: u64,
    pub fetch_errors: u64,
    pub urls_discovered: u64,
    pub fetched_per_thread: Vec<u64>,
    pub errors_per_thread: Vec<u64>,
    #[serde(default)]
    pub crawl_time_secs: u64,
    pub saved_at: DateTime<Utc>,
}

/// Reads a recovery record written by [`CrawlStatistics::save_recovery`]
pub fn load_recovery(path: &Path) -> Result<StatisticsRecord, CrawlerError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CrawlerError::RecoveryNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    toml::from_str(&content).map_err(|source| CrawlerError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Human-readable crawl status
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub thread_count: u16,
    pub queue_size: usize,
    pub pages_fetched: u64,
    pub fetch_errors: u64,
    pub domains_discovered: usize,
    pub urls_discovered: u64,
    pub subqueue_utilization: f64,
    pub fetched_per_thread: Vec<u64>,
    pub crawl_time: Duration,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Thread count: {}", self.thread_count)?;
        writeln!(f, "Queue size: {}", self.queue_size)?;
        writeln!(f, "Pages correctly fetched: {}", self.pages_fetched)?;
        writeln!(f, "Pages with fetch error: {}", self.fetch_errors)?;
        writeln!(f, "Domains discovered: {}", self.domains_discovered)?;
        writeln!(f, "Valid URLs discovered: {}", self.urls_discovered)?;
        writeln!(
            f,
            "Non-empty subqueues: {:.1}%",
            self.subqueue_utilization * 100.0
        )?;
        for (worker, fetched) in self.fetched_per_thread.iter().enumerate() {
            writeln!(f, "Thread {} fetched: {} pages", worker, fetched)?;
        }
        writeln!(f, "Crawl time: {} min", self.crawl_time.as_secs() / 60)
    }
}

/// Writes `content` to a sibling temporary file, syncs it, and renames it over `path`
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), CrawlerError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    let mut file = File::create(&tmp)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}
