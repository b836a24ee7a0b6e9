//! Crawler coordinator - process wiring for a crawl
//!
//! This module brings a crawl up and takes it down again, including:
//! - Creating a fresh queue or restoring the persisted one
//! - Rebuilding statistics and the discovered-URL set on restore
//! - Seeding the queue and starting worker threads
//! - Running the snapshotter alongside the workers
//! - Orderly shutdown: cancel, join, final snapshot, close

use crate::config::{validate_thread_count, Config};
use crate::crawler::fetcher::build_http_client;
use crate::crawler::snapshot::Snapshotter;
use crate::crawler::worker::{admit_links, run_worker, WorkerContext};
use crate::output::{load_recovery, CrawlStatistics};
use crate::queue::RoundRobinQueue;
use crate::state::{CookieJar, DiscoveredUrls};
use crate::storage::{RunMode, RunStatus, SqliteStorage, Storage};
use crate::url::{is_crawlable, normalize_url, UrlFilter};
use crate::CrawlerError;
use reqwest::Client;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Stored on runs started without a config file
const DEFAULT_CONFIG_HASH: &str = "default";

/// How the crawl gets its queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Start over with an empty queue and `thread_count` workers
    Create { thread_count: u16 },

    /// Continue the persisted crawl with its recorded thread count
    Restore,
}

impl CrawlMode {
    fn run_mode(&self) -> RunMode {
        match self {
            Self::Create { .. } => RunMode::Create,
            Self::Restore => RunMode::Restore,
        }
    }
}

/// Startup options given on the command line
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub mode: CrawlMode,
    pub use_cookies: bool,
    pub config_hash: Option<String>,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    queue: Arc<RoundRobinQueue>,
    stats: Arc<CrawlStatistics>,
    discovered: Arc<DiscoveredUrls>,
    storage: Arc<Mutex<SqliteStorage>>,
    cookies: Arc<CookieJar>,
    client: Client,
    filter: UrlFilter,
    run_id: i64,
}

impl Coordinator {
    /// Prepares a crawl without starting any worker
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `options` - Mode, cookie flag and config hash
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Queue, statistics and archive are ready
    /// * `Err(CrawlerError)` - A persisted file is missing or unreadable
    pub fn new(config: Config, options: CrawlOptions) -> Result<Self, CrawlerError> {
        fs::create_dir_all(&config.paths.data_dir)?;
        let mut storage = SqliteStorage::new(&config.paths.database_path())?;

        let (queue, stats, discovered) = match options.mode {
            CrawlMode::Create { thread_count } => {
                tracing::info!("Creating a new crawl with {} workers", thread_count);
                let queue = Arc::new(RoundRobinQueue::create(config.paths.queue_dir())?);
                storage.clear_discovered()?;

                let stats = CrawlStatistics::new(queue.clone(), thread_count);
                (queue, stats, DiscoveredUrls::new())
            }
            CrawlMode::Restore => {
                let record = load_recovery(&config.paths.recovery_path())?;
                validate_thread_count(usize::from(record.thread_count))?;

                let queue = Arc::new(RoundRobinQueue::restore(config.paths.queue_dir())?);
                let discovered = DiscoveredUrls::from_saved(storage.load_discovered()?);
                tracing::info!(
                    "Restored crawl: {} queued URLs across {} domains, {} discovered URLs, {} workers",
                    queue.len(),
                    queue.domains_discovered(),
                    discovered.len(),
                    record.thread_count
                );

                let stats = CrawlStatistics::from_record(queue.clone(), &record);
                (queue, stats, discovered)
            }
        };

        let cookies = if options.use_cookies {
            let jar = CookieJar::load(&config.paths.cookies_file)?;
            tracing::info!("Loaded cookies for {} domains", jar.len());
            jar
        } else {
            CookieJar::empty()
        };

        let client = build_http_client(&config.crawler)?;

        let config_hash = options.config_hash.as_deref().unwrap_or(DEFAULT_CONFIG_HASH);
        let run_id = storage.create_run(options.mode.run_mode(), config_hash)?;

        Ok(Self {
            config: Arc::new(config),
            queue,
            stats: Arc::new(stats),
            discovered: Arc::new(discovered),
            storage: Arc::new(Mutex::new(storage)),
            cookies: Arc::new(cookies),
            client,
            filter: is_crawlable,
            run_id,
        })
    }

    /// Replaces the URL admission filter
    pub fn with_filter(mut self, filter: UrlFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn queue(&self) -> &Arc<RoundRobinQueue> {
        &self.queue
    }

    pub fn statistics(&self) -> &Arc<CrawlStatistics> {
        &self.stats
    }

    /// Offers the seed URLs to the queue
    ///
    /// Seeds already discovered by a restored crawl are skipped.
    ///
    /// # Returns
    ///
    /// The number of seeds actually queued
    pub fn seed(&self) -> Result<usize, CrawlerError> {
        let seeds = load_seeds(&self.config.paths.seeds_file)?;
        let added = admit_links(&self.queue, &self.discovered, self.filter, &seeds)?;
        self.stats.record_discovered(added as u64);

        tracing::info!("Queued {} of {} seed URLs", added, seeds.len());
        Ok(added)
    }

    /// Seeds the queue and crawls until `shutdown` resolves or a worker fails
    ///
    /// # Returns
    ///
    /// The status the run was recorded with
    pub async fn run<F>(self, shutdown: F) -> Result<RunStatus, CrawlerError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Starting crawl run {}", self.run_id);
        self.seed()?;

        let (snapshot_tx, snapshot_rx) = watch::channel(false);
        let snapshotter = Snapshotter::new(
            self.stats.clone(),
            self.discovered.clone(),
            self.storage.clone(),
            self.config.paths.status_path(),
            self.config.paths.recovery_path(),
        )
        .spawn(self.config.persistence.snapshot_interval(), snapshot_rx);

        let ctx = WorkerContext {
            queue: self.queue.clone(),
            stats: self.stats.clone(),
            discovered: self.discovered.clone(),
            storage: self.storage.clone(),
            cookies: self.cookies.clone(),
            client: self.client.clone(),
            filter: self.filter,
            run_id: self.run_id,
            max_content_length: self.config.crawler.max_content_length,
            runtime: Handle::current(),
        };

        let mut workers = JoinSet::new();
        for worker_id in 0..usize::from(self.stats.thread_count()) {
            let ctx = ctx.clone();
            workers.spawn_blocking(move || (worker_id, run_worker(worker_id, ctx)));
        }

        let mut status = RunStatus::Interrupted;
        tokio::pin!(shutdown);

        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, stopping workers");
            }
            Some(joined) = workers.join_next() => {
                if !report_worker_exit(joined) {
                    status = RunStatus::Failed;
                }
                tracing::warn!("A worker stopped unexpectedly, stopping the crawl");
            }
        }

        self.queue.shutdown();
        while let Some(joined) = workers.join_next().await {
            if !report_worker_exit(joined) {
                status = RunStatus::Failed;
            }
        }

        // Workers are gone, so the final snapshot sees settled counters
        if snapshot_tx.send(true).is_err() {
            tracing::debug!("Snapshotter already stopped before the shutdown signal");
        }
        snapshotter
            .await
            .map_err(|e| CrawlerError::Task(e.to_string()))?;

        self.queue.close()?;

        match self.storage.lock() {
            Ok(mut storage) => storage.finish_run(self.run_id, status)?,
            Err(_) => return Err(CrawlerError::Poisoned("archive")),
        }

        tracing::info!(
            "Crawl run {} {}: {} pages fetched, {} fetch errors",
            self.run_id,
            status,
            self.stats.pages_fetched(),
            self.stats.fetch_errors()
        );
        Ok(status)
    }
}

/// Logs how a worker ended, returning false if it failed
fn report_worker_exit(
    joined: Result<(usize, Result<(), CrawlerError>), tokio::task::JoinError>,
) -> bool {
    match joined {
        Ok((_, Ok(()))) => true,
        Ok((worker_id, Err(e))) => {
            tracing::error!("Worker {} failed: {}", worker_id, e);
            false
        }
        Err(e) => {
            tracing::error!("Worker panicked: {}", e);
            false
        }
    }
}

/// Reads the seed file: one URL per line, `#` starts a comment
///
/// Lines that do not normalize to an HTTP(S) URL are skipped with a warning.
pub fn load_seeds(path: &Path) -> Result<Vec<String>, CrawlerError> {
    let content = fs::read_to_string(path)?;
    let mut seeds = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match normalize_url(line) {
            Ok(url) => seeds.push(url.to_string()),
            Err(e) => tracing::warn!(
                "Skipping seed on line {} of {}: {}",
                line_no + 1,
                path.display(),
                e
            ),
        }
    }

    Ok(seeds)
}

/// Runs a crawl until Ctrl-C
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `options` - Mode, cookie flag and config hash
///
/// # Example
///
/// ```no_run
/// use onion_crawler::config::Config;
/// use onion_crawler::crawler::{run_crawl, CrawlMode, CrawlOptions};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let options = CrawlOptions {
///     mode: CrawlMode::Create { thread_count: 8 },
///     use_cookies: false,
///     config_hash: None,
/// };
/// run_crawl(Config::default(), options).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Config, options: CrawlOptions) -> Result<RunStatus, CrawlerError> {
    let coordinator = Coordinator::new(config, options)?;

    coordinator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
