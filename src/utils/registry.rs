//! Expiring Registry for Issued Puzzles
//!
//! A generic key store whose entries carry an optional expiration instant.
//! Expired entries are invisible to lookups immediately; a background sweep
//! reclaims their memory later.
//!
//! Every operation goes through one mutex over the underlying map, so inserts
//! and lookups from different connections are linearized.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::constants;

/// Default sweep interval
pub const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    /// `None` never expires
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    #[inline]
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Key store with lazy expiry on read and periodic sweeping
#[derive(Debug)]
pub struct ExpiringRegistry<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> ExpiringRegistry<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or overwrite `key`, visible until `expires_at`
    pub fn add_with_expiry(&self, key: K, value: V, expires_at: Instant) {
        self.lock().insert(
            key,
            Entry {
                value,
                expires_at: Some(expires_at),
            },
        );
    }

    /// Insert or overwrite `key` with no expiry
    pub fn add(&self, key: K, value: V) {
        self.lock().insert(
            key,
            Entry {
                value,
                expires_at: None,
            },
        );
    }

    /// Value for `key`, or `None` if it is absent or already expired.
    ///
    /// Expired entries still in the map are reported missing.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Remove `key`; a no-op when it is absent
    pub fn delete(&self, key: &K) {
        self.lock().remove(key);
    }

    /// Remove `key` and return its value if it was still live.
    ///
    /// Lookup and removal happen under one lock acquisition, so of several
    /// concurrent callers at most one gets the value.
    pub fn take(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.lock()
            .remove(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Entries physically present, expired or not
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        // A panic mid-operation cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            warn!("{}", constants::ERR_LOCK_POISONED);
            poisoned.into_inner()
        })
    }
}

impl<K, V> ExpiringRegistry<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Start the background sweep on the current Tokio runtime.
    ///
    /// Returns `None` without spawning anything when `interval` is zero.
    /// The task stops once `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }

        let registry = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Registry sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let removed = registry.clear_expired();
                        if removed > 0 {
                            debug!(removed, "Cleaned up expired registry entries");
                        }
                    }
                }
            }
        }))
    }
}

impl<K, V> Default for ExpiringRegistry<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_get_before_and_after_expiry() {
        let registry = ExpiringRegistry::new();
        registry.add_with_expiry("key", (), Instant::now() + Duration::from_millis(50));

        assert_eq!(registry.get(&"key"), Some(()));

        thread::sleep(Duration::from_millis(60));

        // Still physically present, but logically gone
        assert_eq!(registry.get(&"key"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_expiry_at_deadline_is_not_found() {
        let registry = ExpiringRegistry::new();
        registry.add_with_expiry("key", 1u8, Instant::now());
        assert_eq!(registry.get(&"key"), None);
    }

    #[test]
    fn test_add_without_expiry() {
        let registry = ExpiringRegistry::new();
        registry.add("key", 7u32);
        assert_eq!(registry.get(&"key"), Some(7));
        assert_eq!(registry.clear_expired(), 0);
        assert_eq!(registry.get(&"key"), Some(7));
    }

    #[test]
    fn test_overwrite() {
        let registry = ExpiringRegistry::new();
        registry.add_with_expiry("key", 1u8, Instant::now());
        registry.add_with_expiry("key", 2u8, Instant::now() + Duration::from_secs(60));
        assert_eq!(registry.get(&"key"), Some(2));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let registry: ExpiringRegistry<&str, ()> = ExpiringRegistry::new();
        registry.delete(&"missing");

        registry.add("key", ());
        registry.delete(&"key");
        registry.delete(&"key");
        assert_eq!(registry.get(&"key"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_take_is_single_use() {
        let registry = ExpiringRegistry::new();
        registry.add_with_expiry("key", 3u8, Instant::now() + Duration::from_secs(60));
        assert_eq!(registry.take(&"key"), Some(3));
        assert_eq!(registry.take(&"key"), None);
        assert_eq!(registry.get(&"key"), None);

        registry.add_with_expiry("stale", 4u8, Instant::now());
        assert_eq!(registry.take(&"stale"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_expired() {
        let registry = ExpiringRegistry::new();
        let now = Instant::now();
        registry.add_with_expiry("old", (), now);
        registry.add_with_expiry("fresh", (), now + Duration::from_secs(60));
        registry.add("forever", ());

        assert_eq!(registry.clear_expired(), 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&"fresh"), Some(()));
    }

    #[test]
    fn test_concurrent_access() {
        let registry = Arc::new(ExpiringRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("{t}-{i}");
                        registry.add_with_expiry(
                            key.clone(),
                            (),
                            Instant::now() + Duration::from_secs(60),
                        );
                        assert_eq!(registry.get(&key), Some(()));
                        if i % 2 == 0 {
                            registry.delete(&key);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker");
        }
        assert_eq!(registry.len(), 8 * 250);
    }

    #[tokio::test]
    async fn test_sweeper_reclaims_expired_entries() {
        let registry = Arc::new(ExpiringRegistry::new());
        registry.add_with_expiry("key", (), Instant::now() + Duration::from_millis(10));

        let shutdown = CancellationToken::new();
        let sweeper = registry
            .spawn_sweeper(Duration::from_millis(20), shutdown.clone())
            .expect("sweeper");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.is_empty());

        shutdown.cancel();
        sweeper.await.expect("sweeper join");
    }

    #[tokio::test]
    async fn test_zero_interval_disables_sweeper() {
        let registry: Arc<ExpiringRegistry<String, ()>> = Arc::new(ExpiringRegistry::new());
        assert!(registry
            .spawn_sweeper(Duration::ZERO, CancellationToken::new())
            .is_none());
    }
}
