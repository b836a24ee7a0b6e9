//! Persistent round-robin work queue
//!
//! This module is responsible for:
//! - Keeping one durable segment log per domain, plus a "current round" log
//! - Handing out URLs one domain at a time so no domain can starve the others
//! - Blocking, timed and non-blocking dequeues with explicit cancellation
//! - Rebuilding the exact pending state from the log folder after a restart
//!
//! A round is formed only when the round log is empty: the head of every
//! non-empty domain log (in domain key order) is moved into the round log,
//! which is then served strictly FIFO. Every mutation goes through the segment
//! logs before it is acknowledged.

use crate::queue::error::{LogError, QueueError, QueueResult};
use crate::queue::segment::SegmentLog;
use crate::url::domain_key;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// File extension of every log the queue owns
pub const LOG_SUFFIX: &str = "queue";

/// File stem of the round log
pub const ROUND_LOG_NAME: &str = "currentRound";

/// Outcome of a blocking or timed dequeue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    /// A URL was taken from the queue
    Item(String),

    /// The timeout elapsed with the queue still empty
    TimedOut,

    /// The queue was shut down while waiting
    Cancelled,
}

impl Dequeued {
    /// Returns the URL if one was dequeued
    pub fn into_item(self) -> Option<String> {
        match self {
            Self::Item(url) => Some(url),
            Self::TimedOut | Self::Cancelled => None,
        }
    }
}

/// Read-only gauges exposed to crawl statistics
pub trait QueueMetrics: Send + Sync {
    /// Number of pending URLs
    fn len(&self) -> usize;

    /// Number of distinct domains ever seen, including drained ones
    fn domains_discovered(&self) -> usize;

    /// Fraction of domain logs currently holding work (1.0 with no domains)
    fn subqueue_utilization(&self) -> f64;
}

struct Logs {
    round: SegmentLog,
    domains: BTreeMap<String, SegmentLog>,
}

/// A durable, thread-safe queue that serves domains in round-robin order
pub struct RoundRobinQueue {
    folder: PathBuf,
    logs: Mutex<Option<Logs>>,
    not_empty: Condvar,
    total: AtomicUsize,
    domains: AtomicUsize,
    non_empty_domains: AtomicUsize,
    shutdown: AtomicBool,
}

impl RoundRobinQueue {
    /// Creates a fresh, empty queue in `folder`
    ///
    /// The folder is created if missing. Log files left by a previous run are
    /// deleted; other files in the folder are left alone.
    pub fn create(folder: impl AsRef<Path>) -> QueueResult<Self> {
        let folder = folder.as_ref().to_path_buf();
        fs::create_dir_all(&folder).map_err(folder_error(&folder))?;

        let mut removed = 0;
        for path in list_files(&folder)? {
            if is_log_file(&path) || is_compaction_leftover(&path) {
                fs::remove_file(&path).map_err(folder_error(&path))?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(
                "Removed {} log files from previous run in {}",
                removed,
                folder.display()
            );
        }

        let round = SegmentLog::create(log_path(&folder, ROUND_LOG_NAME))?;

        tracing::info!("Created round-robin queue in {}", folder.display());

        Ok(Self::from_logs(folder, round, BTreeMap::new()))
    }

    /// Reopens a queue previously written to `folder`
    ///
    /// Every `<domain>.queue` file becomes a domain log keyed by its file stem.
    /// Fails with [`LogError::NotFound`] if the round log is missing.
    pub fn restore(folder: impl AsRef<Path>) -> QueueResult<Self> {
        let folder = folder.as_ref().to_path_buf();
        let round = SegmentLog::open(log_path(&folder, ROUND_LOG_NAME))?;

        let mut domains = BTreeMap::new();
        for path in list_files(&folder)? {
            if is_compaction_leftover(&path) {
                tracing::warn!("Removing interrupted compaction file {}", path.display());
                fs::remove_file(&path).map_err(folder_error(&path))?;
                continue;
            }
            if !is_log_file(&path) {
                continue;
            }

            let key = match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(key) if key == ROUND_LOG_NAME => continue,
                Some(key) => key.to_string(),
                None => {
                    tracing::warn!("Skipping log with non UTF-8 name: {}", path.display());
                    continue;
                }
            };

            let log = SegmentLog::open(&path)?;
            tracing::debug!("Restored domain {} with {} URLs", key, log.len());
            domains.insert(key, log);
        }

        let queue = Self::from_logs(folder, round, domains);

        tracing::info!(
            "Restored round-robin queue from {}: {} URLs across {} domains",
            queue.folder.display(),
            queue.len(),
            queue.domains_discovered()
        );

        Ok(queue)
    }

    fn from_logs(folder: PathBuf, round: SegmentLog, domains: BTreeMap<String, SegmentLog>) -> Self {
        let total = round.len() + domains.values().map(SegmentLog::len).sum::<usize>();
        let non_empty = domains.values().filter(|log| !log.is_empty()).count();
        let domain_count = domains.len();

        Self {
            folder,
            logs: Mutex::new(Some(Logs { round, domains })),
            not_empty: Condvar::new(),
            total: AtomicUsize::new(total),
            domains: AtomicUsize::new(domain_count),
            non_empty_domains: AtomicUsize::new(non_empty),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Folder holding the queue's log files
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Appends a URL to its domain's log and wakes one waiting consumer
    ///
    /// Capacity is unbounded, so this never blocks and never reports full.
    pub fn enqueue(&self, url: &str) -> QueueResult<()> {
        self.with_logs(|logs| self.push(logs, url))?;
        self.not_empty.notify_one();
        Ok(())
    }

    /// Same as [`enqueue`](Self::enqueue); an unbounded queue never has to wait for space
    pub fn blocking_enqueue(&self, url: &str) -> QueueResult<()> {
        self.enqueue(url)
    }

    /// Enqueues every URL under a single lock acquisition
    ///
    /// # Returns
    ///
    /// The number of URLs added
    pub fn enqueue_all<I, S>(&self, urls: I) -> QueueResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // URLs pushed before a failure are durable and must still wake consumers
        let mut added = 0;
        let result = self.with_logs(|logs| {
            for url in urls {
                self.push(logs, url.as_ref())?;
                added += 1;
            }
            Ok(())
        });

        if added > 0 {
            self.not_empty.notify_all();
        }
        result.map(|()| added)
    }

    /// Takes the next URL if one is available, forming a new round if needed
    pub fn try_dequeue(&self) -> QueueResult<Option<String>> {
        self.with_logs(|logs| self.pop(logs))
    }

    /// Returns the next URL without removing it
    pub fn try_peek(&self) -> QueueResult<Option<String>> {
        self.with_logs(|logs| {
            if !self.ensure_round(logs)? {
                return Ok(None);
            }
            Ok(logs.round.peek_oldest()?)
        })
    }

    /// Waits up to `timeout` for a URL
    pub fn timed_dequeue(&self, timeout: Duration) -> QueueResult<Dequeued> {
        self.wait_for_item(Some(Instant::now() + timeout))
    }

    /// Waits until a URL is available or the queue is shut down
    pub fn blocking_dequeue(&self) -> QueueResult<Dequeued> {
        self.wait_for_item(None)
    }

    fn wait_for_item(&self, deadline: Option<Instant>) -> QueueResult<Dequeued> {
        let mut guard = self.lock()?;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(Dequeued::Cancelled);
            }

            let logs = guard.as_mut().ok_or(QueueError::Closed)?;
            if let Some(url) = self.pop(logs)? {
                return Ok(Dequeued::Item(url));
            }

            guard = match deadline {
                None => self
                    .not_empty
                    .wait(guard)
                    .map_err(|_| QueueError::Poisoned)?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Dequeued::TimedOut);
                    }
                    self.not_empty
                        .wait_timeout(guard, deadline - now)
                        .map_err(|_| QueueError::Poisoned)?
                        .0
                }
            };
        }
    }

    /// Moves up to `max` URLs into `sink`, round log first, then domains in key order
    ///
    /// # Returns
    ///
    /// The number of URLs moved
    pub fn drain_to<E>(&self, sink: &mut E, max: usize) -> QueueResult<usize>
    where
        E: Extend<String>,
    {
        self.with_logs(|logs| {
            let batch = logs.round.peek_oldest_n(max)?;
            logs.round.remove_oldest_n(batch.len())?;
            self.total.fetch_sub(batch.len(), Ordering::SeqCst);
            let mut moved = batch.len();
            sink.extend(batch);

            for log in logs.domains.values_mut() {
                if moved == max {
                    break;
                }
                let batch = log.peek_oldest_n(max - moved)?;
                if batch.is_empty() {
                    continue;
                }
                log.remove_oldest_n(batch.len())?;
                if log.is_empty() {
                    self.non_empty_domains.fetch_sub(1, Ordering::SeqCst);
                }
                self.total.fetch_sub(batch.len(), Ordering::SeqCst);
                moved += batch.len();
                sink.extend(batch);
            }

            Ok(moved)
        })
    }

    /// Moves every pending URL into `sink`
    pub fn drain_all<E>(&self, sink: &mut E) -> QueueResult<usize>
    where
        E: Extend<String>,
    {
        self.drain_to(sink, usize::MAX)
    }

    /// Durably empties every log; discovered domains stay registered
    pub fn clear(&self) -> QueueResult<()> {
        self.with_logs(|logs| {
            logs.round.clear()?;
            for log in logs.domains.values_mut() {
                log.clear()?;
            }
            self.total.store(0, Ordering::SeqCst);
            self.non_empty_domains.store(0, Ordering::SeqCst);
            Ok(())
        })
    }

    /// Removes `url` if it is the head of the round log or of its domain log
    ///
    /// Logs only support removing their oldest record, so this is the only
    /// targeted removal the queue offers.
    pub fn remove_if_head(&self, url: &str) -> QueueResult<bool> {
        self.with_logs(|logs| {
            if logs.round.peek_oldest()?.as_deref() == Some(url) {
                logs.round.remove_oldest()?;
                self.total.fetch_sub(1, Ordering::SeqCst);
                return Ok(true);
            }

            if let Some(log) = logs.domains.get_mut(&domain_key(url)) {
                if log.peek_oldest()?.as_deref() == Some(url) {
                    log.remove_oldest()?;
                    if log.is_empty() {
                        self.non_empty_domains.fetch_sub(1, Ordering::SeqCst);
                    }
                    self.total.fetch_sub(1, Ordering::SeqCst);
                    return Ok(true);
                }
            }

            Ok(false)
        })
    }

    /// Scans the round log and the URL's domain log for `url`
    pub fn contains(&self, url: &str) -> QueueResult<bool> {
        self.with_logs(|logs| {
            if logs.round.read_all()?.iter().any(|pending| pending == url) {
                return Ok(true);
            }
            match logs.domains.get(&domain_key(url)) {
                Some(log) => Ok(log.read_all()?.iter().any(|pending| pending == url)),
                None => Ok(false),
            }
        })
    }

    /// Every pending URL: the round log first, then each domain in key order
    pub fn snapshot(&self) -> QueueResult<Vec<String>> {
        self.with_logs(|logs| {
            let mut urls = logs.round.read_all()?;
            for log in logs.domains.values() {
                urls.extend(log.read_all()?);
            }
            Ok(urls)
        })
    }

    /// Always `usize::MAX`; the queue is unbounded
    pub fn remaining_capacity(&self) -> usize {
        usize::MAX
    }

    pub fn contains_all<I, S>(&self, _urls: I) -> QueueResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Err(QueueError::Unsupported("contains_all"))
    }

    pub fn remove_all<I, S>(&self, _urls: I) -> QueueResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Err(QueueError::Unsupported("remove_all"))
    }

    pub fn retain_all<I, S>(&self, _urls: I) -> QueueResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Err(QueueError::Unsupported("retain_all"))
    }

    /// Live iteration is not possible over head-only logs; use [`snapshot`](Self::snapshot)
    pub fn iter(&self) -> QueueResult<std::vec::IntoIter<String>> {
        Err(QueueError::Unsupported("iter"))
    }

    pub fn len(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn domains_discovered(&self) -> usize {
        self.domains.load(Ordering::SeqCst)
    }

    pub fn subqueue_utilization(&self) -> f64 {
        let domains = self.domains_discovered();
        if domains == 0 {
            return 1.0;
        }
        self.non_empty_domains.load(Ordering::SeqCst) as f64 / domains as f64
    }

    /// Wakes every waiting consumer; blocking dequeues then return [`Dequeued::Cancelled`]
    pub fn shutdown(&self) {
        // Taking the lock orders the flag against a consumer that is about to wait
        let _guard = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        self.shutdown.store(true, Ordering::SeqCst);
        self.not_empty.notify_all();
        tracing::debug!("Round-robin queue shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Flushes and closes every log; later operations fail with [`QueueError::Closed`]
    pub fn close(&self) -> QueueResult<()> {
        let logs = self.lock()?.take();
        self.not_empty.notify_all();

        let Some(Logs { round, domains }) = logs else {
            return Ok(());
        };

        round.close()?;
        for (_, log) in domains {
            log.close()?;
        }

        tracing::info!("Closed round-robin queue in {}", self.folder.display());
        Ok(())
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, Option<Logs>>> {
        self.logs.lock().map_err(|_| QueueError::Poisoned)
    }

    fn with_logs<T>(&self, f: impl FnOnce(&mut Logs) -> QueueResult<T>) -> QueueResult<T> {
        let mut guard = self.lock()?;
        let logs = guard.as_mut().ok_or(QueueError::Closed)?;
        f(logs)
    }

    fn push(&self, logs: &mut Logs, url: &str) -> QueueResult<()> {
        if url.trim().is_empty() {
            return Err(QueueError::InvalidArgument("empty URL".to_string()));
        }

        let log = match logs.domains.entry(domain_key(url)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let log = SegmentLog::create(log_path(&self.folder, entry.key()))?;
                self.domains.fetch_add(1, Ordering::SeqCst);
                tracing::debug!("Discovered new domain {}", entry.key());
                entry.insert(log)
            }
        };

        let was_empty = log.is_empty();
        log.append(url)?;
        if was_empty {
            self.non_empty_domains.fetch_add(1, Ordering::SeqCst);
        }
        self.total.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    fn pop(&self, logs: &mut Logs) -> QueueResult<Option<String>> {
        if !self.ensure_round(logs)? {
            return Ok(None);
        }

        let url = logs
            .round
            .peek_oldest()?
            .ok_or_else(|| QueueError::Inconsistent("round log emptied under the lock".to_string()))?;
        logs.round.remove_oldest()?;
        self.total.fetch_sub(1, Ordering::SeqCst);

        Ok(Some(url))
    }

    /// Makes sure the round log has work, returning false if the whole queue is empty
    fn ensure_round(&self, logs: &mut Logs) -> QueueResult<bool> {
        if !logs.round.is_empty() {
            return Ok(true);
        }
        if self.non_empty_domains.load(Ordering::SeqCst) == 0 {
            return Ok(false);
        }

        self.generate_round(logs)?;
        Ok(true)
    }

    /// Moves the head of every non-empty domain log into the round log
    fn generate_round(&self, logs: &mut Logs) -> QueueResult<()> {
        let Logs { round, domains } = logs;

        for log in domains.values_mut() {
            let Some(url) = log.peek_oldest()? else {
                continue;
            };
            // Appending first means a crash in between duplicates the URL instead of losing it
            round.append(&url)?;
            log.remove_oldest()?;
            if log.is_empty() {
                self.non_empty_domains.fetch_sub(1, Ordering::SeqCst);
            }
        }

        if round.is_empty() {
            return Err(QueueError::Inconsistent(
                "round generation found no work in non-empty domains".to_string(),
            ));
        }

        tracing::trace!("Generated round of {} URLs", round.len());
        Ok(())
    }
}

impl QueueMetrics for RoundRobinQueue {
    fn len(&self) -> usize {
        RoundRobinQueue::len(self)
    }

    fn domains_discovered(&self) -> usize {
        RoundRobinQueue::domains_discovered(self)
    }

    fn subqueue_utilization(&self) -> f64 {
        RoundRobinQueue::subqueue_utilization(self)
    }
}

impl std::fmt::Debug for RoundRobinQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundRobinQueue")
            .field("folder", &self.folder)
            .field("len", &self.len())
            .field("domains", &self.domains_discovered())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn log_path(folder: &Path, key: &str) -> PathBuf {
    folder.join(format!("{}.{}", key, LOG_SUFFIX))
}

fn is_log_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(LOG_SUFFIX)
}

fn is_compaction_leftover(path: &Path) -> bool {
    path.to_str()
        .map(|name| name.ends_with(&format!(".{}.compact", LOG_SUFFIX)))
        .unwrap_or(false)
}

fn list_files(folder: &Path) -> QueueResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder).map_err(folder_error(folder))? {
        let path = entry.map_err(folder_error(folder))?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

fn folder_error(path: &Path) -> impl FnOnce(io::Error) -> LogError + '_ {
    move |source| LogError::Io {
        path: path.to_path_buf(),
        source,
    }
}
