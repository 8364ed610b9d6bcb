use super::store::{CountingStore, StoreKind};
use super::types::Increment;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::debug;

/// One fixed window for one key
#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// In-process counting store.
///
/// Counters live in a sharded map; the read-modify-write for a key happens
/// under that key's shard lock, so increments on one key are totally
/// ordered. Expired entries are reset on access and dropped by
/// [`LocalStore::sweep`].
#[derive(Debug, Default)]
pub struct LocalStore {
    entries: DashMap<String, CounterEntry>,
}

impl LocalStore {
    /// Create a new local store
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Increment the counter for `key`, opening a new window of `period`
    /// if the key is unknown or its window has elapsed.
    pub fn hit(&self, key: &str, period: Duration) -> Increment {
        let now = Instant::now();

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry {
                count: 0,
                expires_at: now + period,
            });

        if entry.expires_at <= now {
            *entry = CounterEntry {
                count: 0,
                expires_at: now + period,
            };
        }

        entry.count += 1;

        Increment {
            count: entry.count,
            ttl: entry.expires_at.saturating_duration_since(now),
        }
    }

    /// Remove every entry whose window has elapsed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Sweep periodically until the store is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(live) = store.upgrade() else {
                    break;
                };
                let removed = live.sweep();
                if removed > 0 {
                    debug!(removed, "Swept expired rate limit counters");
                }
            }
        })
    }

    /// Number of tracked keys (for testing/monitoring)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CountingStore for LocalStore {
    async fn increment(&self, key: &str, period: Duration) -> Result<Increment> {
        Ok(self.hit(key, period))
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_within_window() {
        let store = LocalStore::new();
        let period = Duration::from_secs(60);

        for expected in 1..=5 {
            let result = store.hit("192.168.1.1", period);
            assert_eq!(result.count, expected);
            assert!(result.ttl <= period);
        }
    }

    #[test]
    fn test_different_keys_are_independent() {
        let store = LocalStore::new();
        let period = Duration::from_secs(60);

        for _ in 0..3 {
            store.hit("192.168.1.1", period);
        }

        assert_eq!(store.hit("192.168.1.2", period).count, 1);
        assert_eq!(store.hit("192.168.1.1:api", period).count, 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_window_is_not_extended_by_hits() {
        let store = LocalStore::new();
        let period = Duration::from_millis(400);

        let first = store.hit("k", period);
        std::thread::sleep(Duration::from_millis(150));
        let second = store.hit("k", period);

        assert!(second.ttl < first.ttl);
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let store = LocalStore::new();
        let period = Duration::from_millis(200);

        store.hit("k", period);
        store.hit("k", period);
        std::thread::sleep(Duration::from_millis(250));

        assert_eq!(store.hit("k", period).count, 1);
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        let store = LocalStore::new();

        store.hit("short", Duration::from_millis(50));
        store.hit("long", Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_totally_ordered() {
        let store = Arc::new(LocalStore::new());
        let period = Duration::from_secs(60);

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment("shared", period).await.unwrap() })
            })
            .collect();

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap().count);
        }
        counts.sort_unstable();

        assert_eq!(counts, (1..=64).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_store_dropped() {
        let store = Arc::new(LocalStore::new());
        let handle = store.spawn_sweeper(Duration::from_millis(10));
        drop(store);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should exit")
            .unwrap();
    }
}
