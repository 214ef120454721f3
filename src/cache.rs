use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::debug;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

type Entries<K, V> = Arc<RwLock<HashMap<K, CacheEntry<V>>>>;

/// Map with a fixed time-to-live per entry.
///
/// Expiry is checked when an entry is read; a background task additionally
/// removes expired entries every `sweep_interval` so keys that are never read
/// again do not accumulate. Reads share the lock, writes and sweeps hold it
/// exclusively.
///
/// Must be created inside a tokio runtime. The sweep task only holds a weak
/// reference to the entries and is stopped when the cache is dropped.
pub struct TtlCache<K, V> {
    entries: Entries<K, V>,
    ttl: Duration,
    sweeper: JoinHandle<()>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        let entries: Entries<K, V> = Arc::new(RwLock::new(HashMap::new()));

        let sweep_entries: Weak<_> = Arc::downgrade(&entries);
        let sweeper = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + sweep_interval, sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(entries) = sweep_entries.upgrade() else {
                    break;
                };
                sweep_expired(&entries).await;
            }
        });

        Self { entries, ttl, sweeper }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores `value`, replacing any previous entry and restarting its TTL.
    pub async fn set(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Returns the value if present and not yet expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Removes every expired entry now, returning how many were dropped.
    pub async fn sweep(&self) -> usize {
        sweep_expired(&self.entries).await
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn sweep_expired<K, V>(entries: &RwLock<HashMap<K, CacheEntry<V>>>) -> usize
where
    K: Eq + Hash,
{
    let now = Instant::now();
    let mut entries = entries.write().await;
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    let removed = before - entries.len();
    if removed > 0 {
        debug!("Cache sweep removed {} expired entries", removed);
    }
    removed
}

impl<K, V> Drop for TtlCache<K, V> {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);
    const SWEEP: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_get_within_ttl() {
        let cache = TtlCache::new(TTL, SWEEP);
        cache.set("whois:example.com".to_string(), 1u32).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&"whois:example.com".to_string()).await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_ttl_misses() {
        let cache = TtlCache::new(TTL, Duration::from_secs(3600));
        cache.set("k".to_string(), "v".to_string()).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&"k".to_string()).await, None);
        // Lazy expiry does not remove the entry
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_set_key_misses() {
        let cache: TtlCache<String, u8> = TtlCache::new(TTL, SWEEP);
        assert_eq!(cache.get(&"missing".to_string()).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_overwrites_and_restarts_ttl() {
        let cache = TtlCache::new(TTL, Duration::from_secs(3600));
        cache.set("k", 1).await;
        tokio::time::advance(Duration::from_secs(40)).await;
        cache.set("k", 2).await;
        tokio::time::advance(Duration::from_secs(40)).await;

        assert_eq!(cache.get(&"k").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_sweep_removes_only_expired() {
        let cache = TtlCache::new(TTL, Duration::from_secs(3600));
        cache.set("old", 1).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.set("new", 2).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&"new").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_evicts_unread_keys() {
        let cache = TtlCache::new(TTL, SWEEP);
        for i in 0..10 {
            cache.set(i, i).await;
        }
        assert_eq!(cache.len().await, 10);

        // Auto-advancing clock lets the sweep ticks fire during the sleep
        tokio::time::sleep(TTL + SWEEP * 2).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_does_not_keep_entries_alive() {
        let cache = TtlCache::new(TTL, SWEEP);
        cache.set("k", 1).await;
        let entries = Arc::downgrade(&cache.entries);

        drop(cache);
        assert!(entries.upgrade().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access_never_tears() {
        let cache = Arc::new(TtlCache::new(TTL, SWEEP));
        let mut handles = Vec::new();

        for task in 0..16u64 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100u64 {
                    let key = (task * 100 + i) % 50;
                    cache.set(key, key * 10).await;
                    if let Some(value) = cache.get(&key).await {
                        assert_eq!(value, key * 10);
                    }
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len().await, 50);
    }
}
