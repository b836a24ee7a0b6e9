//! Periodic persistence of crawl progress
//!
//! The snapshotter writes three things on every tick:
//! - URLs discovered since the last tick, flushed into the archive
//! - The human-readable status file
//! - The TOML recovery record read back by restore mode

use crate::output::{write_atomic, CrawlStatistics};
use crate::state::DiscoveredUrls;
use crate::storage::{SqliteStorage, Storage};
use crate::CrawlerError;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub struct Snapshotter {
    stats: Arc<CrawlStatistics>,
    discovered: Arc<DiscoveredUrls>,
    storage: Arc<Mutex<SqliteStorage>>,
    status_path: PathBuf,
    recovery_path: PathBuf,
}

impl Snapshotter {
    pub fn new(
        stats: Arc<CrawlStatistics>,
        discovered: Arc<DiscoveredUrls>,
        storage: Arc<Mutex<SqliteStorage>>,
        status_path: PathBuf,
        recovery_path: PathBuf,
    ) -> Self {
        Self {
            stats,
            discovered,
            storage,
            status_path,
            recovery_path,
        }
    }

    /// Takes one snapshot
    ///
    /// Discovered URLs are flushed before the recovery record is written, so
    /// a record on disk never counts URLs the archive does not hold. A failed
    /// flush puts the batch back for the next attempt.
    pub fn snapshot(&self) -> Result<(), CrawlerError> {
        let batch = self.discovered.take_unsaved();
        if !batch.is_empty() {
            let saved = match self.storage.lock() {
                Ok(mut storage) => storage.save_discovered(&batch).map_err(CrawlerError::from),
                Err(_) => Err(CrawlerError::Poisoned("archive")),
            };

            match saved {
                Ok(inserted) => tracing::debug!("Archived {} discovered URLs", inserted),
                Err(e) => {
                    self.discovered.restore_unsaved(batch);
                    return Err(e);
                }
            }
        }

        write_atomic(&self.status_path, self.stats.report().to_string().as_bytes())?;
        self.stats.save_recovery(&self.recovery_path)?;
        Ok(())
    }

    /// Snapshots every `period` until `shutdown` flips, then once more
    pub fn spawn(self, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let snapshotter = Arc::new(self);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_blocking(&snapshotter).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Taking final snapshot");
            run_blocking(&snapshotter).await;
        })
    }
}

async fn run_blocking(snapshotter: &Arc<Snapshotter>) {
    let snapshotter = Arc::clone(snapshotter);
    match tokio::task::spawn_blocking(move || snapshotter.snapshot()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Snapshot failed: {}", e),
        Err(e) => tracing::error!("Snapshot task panicked: {}", e),
    }
}
