use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    seen: HashSet<String>,
    unsaved: Vec<String>,
}

/// Every URL the crawl has ever queued
///
/// Workers consult it before enqueueing so a URL is crawled at most once per
/// crawl. URLs inserted since the last snapshot are kept aside until the
/// snapshotter flushes them to the archive.
#[derive(Debug, Default)]
pub struct DiscoveredUrls {
    inner: Mutex<Inner>,
}

impl DiscoveredUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the set from URLs already archived by a previous run
    pub fn from_saved<I>(urls: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            inner: Mutex::new(Inner {
                seen: urls.into_iter().collect(),
                unsaved: Vec::new(),
            }),
        }
    }

    /// Records `url`, returning true if it had not been seen before
    pub fn insert(&self, url: &str) -> bool {
        let mut inner = self.lock();
        if inner.seen.contains(url) {
            return false;
        }
        inner.seen.insert(url.to_string());
        inner.unsaved.push(url.to_string());
        true
    }

    /// Withdraws a URL inserted by a caller that then failed to queue it
    pub fn forget(&self, url: &str) {
        let mut inner = self.lock();
        if inner.seen.remove(url) {
            inner.unsaved.retain(|saved| saved != url);
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().seen.contains(url)
    }

    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands out the URLs inserted since the previous call
    pub fn take_unsaved(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().unsaved)
    }

    /// Puts back URLs whose save failed so the next snapshot retries them
    pub fn restore_unsaved(&self, urls: Vec<String>) {
        let mut inner = self.lock();
        let newer = std::mem::replace(&mut inner.unsaved, urls);
        inner.unsaved.extend(newer);
    }

    // A panic elsewhere cannot leave the set half-updated
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
