//! CounterStore trait and the in-memory implementation

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

/// Error type for counter store operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// Stored value could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure
    #[error("counter store error: {0}")]
    Backend(String),
}

/// Result of an atomic admission against a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreAdmission {
    pub allowed: bool,
    /// Timestamps inside the window after the call
    pub count: u32,
    /// Oldest retained timestamp
    pub oldest_ms: Option<i64>,
}

/// Shared storage for sliding-window counters
///
/// Keys have the form `<prefix>:<limiterName>:<callerKey>`. Entries should
/// expire once idle for twice the window.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Drop timestamps at or before `now_ms - window`, then record `now_ms`
    /// if fewer than `max_requests` remain; all as one atomic step
    async fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        max_requests: u32,
    ) -> Result<StoreAdmission, StoreError>;

    /// Record `now_ms` unconditionally and return the count inside the window
    async fn increment(&self, key: &str, now_ms: i64, window: Duration) -> Result<u32, StoreError>;

    /// Stored timestamps for `key`, oldest first
    async fn get_window(&self, key: &str, now_ms: i64) -> Result<Vec<i64>, StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct StoredWindow {
    timestamps: Vec<i64>,
    expires_at_ms: i64,
}

impl StoredWindow {
    fn live(&mut self, now_ms: i64) -> &mut Vec<i64> {
        if now_ms >= self.expires_at_ms {
            self.timestamps.clear();
        }
        &mut self.timestamps
    }

    fn prune(&mut self, now_ms: i64, window: Duration) {
        let cutoff = now_ms - window.as_millis() as i64;
        self.live(now_ms).retain(|ts| *ts > cutoff);
    }

    fn touch(&mut self, now_ms: i64, window: Duration) {
        self.expires_at_ms = now_ms + 2 * window.as_millis() as i64;
    }
}

/// In-memory [`CounterStore`] for tests and single-process deployments
///
/// Expired entries are purged from `admit` and `increment` at most once per
/// window.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    windows: DashMap<String, StoredWindow>,
    last_purge_ms: AtomicI64,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop entries whose TTL has passed
    pub fn purge_expired(&self, now_ms: i64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| now_ms < w.expires_at_ms);
        before - self.windows.len()
    }

    fn maybe_purge(&self, now_ms: i64, window: Duration) {
        let last = self.last_purge_ms.load(Ordering::Acquire);
        if now_ms - last >= window.as_millis() as i64
            && self
                .last_purge_ms
                .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.purge_expired(now_ms);
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        max_requests: u32,
    ) -> Result<StoreAdmission, StoreError> {
        self.maybe_purge(now_ms, window);
        let mut entry = self.windows.entry(key.to_string()).or_default();
        entry.prune(now_ms, window);

        let allowed = (entry.timestamps.len() as u32) < max_requests;
        if allowed {
            entry.timestamps.push(now_ms);
            entry.touch(now_ms, window);
        }

        Ok(StoreAdmission {
            allowed,
            count: entry.timestamps.len() as u32,
            oldest_ms: entry.timestamps.first().copied(),
        })
    }

    async fn increment(&self, key: &str, now_ms: i64, window: Duration) -> Result<u32, StoreError> {
        self.maybe_purge(now_ms, window);
        let mut entry = self.windows.entry(key.to_string()).or_default();
        entry.prune(now_ms, window);
        entry.timestamps.push(now_ms);
        entry.touch(now_ms, window);
        Ok(entry.timestamps.len() as u32)
    }

    async fn get_window(&self, key: &str, now_ms: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .windows
            .get_mut(key)
            .map(|mut w| w.live(now_ms).clone())
            .unwrap_or_default())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.windows.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    #[tokio::test]
    async fn test_admit_enforces_limit() {
        let store = InMemoryCounterStore::new();

        for t in [0, 10, 20] {
            assert!(store.admit("k", t, WINDOW, 3).await.unwrap().allowed);
        }
        let rejected = store.admit("k", 500, WINDOW, 3).await.unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.count, 3);
        assert_eq!(rejected.oldest_ms, Some(0));

        let admitted = store.admit("k", 1001, WINDOW, 3).await.unwrap();
        assert!(admitted.allowed);
        assert_eq!(admitted.oldest_ms, Some(10));
    }

    #[tokio::test]
    async fn test_entries_expire_after_twice_the_window() {
        let store = InMemoryCounterStore::new();
        store.increment("k", 0, WINDOW).await.unwrap();

        assert_eq!(store.get_window("k", 1999).await.unwrap(), vec![0]);
        assert!(store.get_window("k", 2000).await.unwrap().is_empty());

        assert_eq!(store.purge_expired(2000), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_increment_and_remove() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.increment("k", 0, WINDOW).await.unwrap(), 1);
        assert_eq!(store.increment("k", 100, WINDOW).await.unwrap(), 2);
        assert_eq!(store.increment("k", 1050, WINDOW).await.unwrap(), 2);

        store.remove("k").await.unwrap();
        assert!(store.get_window("k", 1100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writes_purge_expired_entries() {
        let store = InMemoryCounterStore::new();
        for i in 0..10 {
            store.increment(&format!("caller-{i}"), 0, WINDOW).await.unwrap();
        }
        store.admit("caller-0", 1500, WINDOW, 5).await.unwrap();
        assert_eq!(store.len(), 10);

        store.admit("fresh", 2600, WINDOW, 5).await.unwrap();
        assert_eq!(store.len(), 2);

        store.increment("fresh", 4600, WINDOW).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
