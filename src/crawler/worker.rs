//! Crawl worker loop
//!
//! Each worker runs on its own OS thread, blocking on the fair queue and
//! driving the async fetcher through the runtime handle it was given.

use crate::crawler::fetcher::{fetch_page, FetchResult};
use crate::output::CrawlStatistics;
use crate::queue::{Dequeued, QueueError, QueueResult, RoundRobinQueue};
use crate::state::{CookieJar, DiscoveredUrls};
use crate::storage::{SqliteStorage, Storage, StorageResult};
use crate::url::UrlFilter;
use crate::CrawlerError;
use reqwest::Client;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;

/// Everything a worker shares with the rest of the crawl
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<RoundRobinQueue>,
    pub stats: Arc<CrawlStatistics>,
    pub discovered: Arc<DiscoveredUrls>,
    pub storage: Arc<Mutex<SqliteStorage>>,
    pub cookies: Arc<CookieJar>,
    pub client: Client,
    pub filter: UrlFilter,
    pub run_id: i64,
    pub max_content_length: usize,
    pub runtime: Handle,
}

/// Runs the fetch loop until the queue is shut down
///
/// # Arguments
///
/// * `worker_id` - Index of this worker, used for per-thread statistics
/// * `ctx` - Shared crawl state
///
/// # Returns
///
/// * `Ok(())` - The queue was shut down
/// * `Err(CrawlerError)` - The queue failed; the worker stops
pub fn run_worker(worker_id: usize, ctx: WorkerContext) -> Result<(), CrawlerError> {
    tracing::info!("Worker {} started", worker_id);

    loop {
        let url = match ctx.queue.blocking_dequeue()? {
            Dequeued::Item(url) => url,
            Dequeued::TimedOut => continue,
            Dequeued::Cancelled => break,
        };

        process_url(worker_id, &ctx, &url)?;
    }

    tracing::info!("Worker {} stopped", worker_id);
    Ok(())
}

fn process_url(worker_id: usize, ctx: &WorkerContext, url: &str) -> Result<(), CrawlerError> {
    tracing::debug!("Worker {} fetching {}", worker_id, url);

    let result = ctx.runtime.block_on(fetch_page(
        &ctx.client,
        url,
        &ctx.cookies,
        ctx.max_content_length,
    ));

    match result {
        FetchResult::Success(page) => {
            ctx.stats.record_success(worker_id);
            archive(ctx, url, |storage| storage.record_page(ctx.run_id, &page));

            let added = admit_links(&ctx.queue, &ctx.discovered, ctx.filter, &page.links)?;
            ctx.stats.record_discovered(added as u64);
            tracing::debug!(
                "Fetched {} ({} links, {} new)",
                url,
                page.links.len(),
                added
            );
        }
        failure => {
            ctx.stats.record_failure(worker_id);
            let error = failure.describe_failure().unwrap_or_default();
            tracing::debug!("Failed to fetch {}: {}", url, error);
            archive(ctx, url, |storage| {
                storage.record_fetch_error(ctx.run_id, url, &error)
            });
        }
    }

    Ok(())
}

/// Archive writes are best effort; the crawl goes on without them
fn archive<F>(ctx: &WorkerContext, url: &str, write: F)
where
    F: FnOnce(&mut SqliteStorage) -> StorageResult<()>,
{
    match ctx.storage.lock() {
        Ok(mut storage) => {
            if let Err(e) = write(&mut storage) {
                tracing::error!("Failed to archive result for {}: {}", url, e);
            }
        }
        Err(_) => tracing::error!("Archive lock poisoned, dropping result for {}", url),
    }
}

/// Queues every URL that passes `filter` and has never been queued before
///
/// A URL counts as discovered only once it is in the queue. URLs the queue
/// rejects as invalid are skipped; any other queue error is returned after
/// withdrawing the URL that caused it.
///
/// # Returns
///
/// The number of URLs added to the queue
pub fn admit_links<S>(
    queue: &RoundRobinQueue,
    discovered: &DiscoveredUrls,
    filter: UrlFilter,
    links: &[S],
) -> QueueResult<usize>
where
    S: AsRef<str>,
{
    let mut added = 0;

    for link in links.iter().map(AsRef::as_ref) {
        if !filter(link) || !discovered.insert(link) {
            continue;
        }

        match queue.enqueue(link) {
            Ok(()) => added += 1,
            Err(QueueError::InvalidArgument(reason)) => {
                discovered.forget(link);
                tracing::warn!("Skipping link {}: {}", link, reason);
            }
            Err(e) => {
                discovered.forget(link);
                return Err(e);
            }
        }
    }

    Ok(added)
}
