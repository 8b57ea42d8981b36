// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! A bounded, TTL-expiring, approximately-LRU cache used by the big segment
//! membership manager.
//!
//! Unlike the store's RW-lock (many readers, occasional writer), this cache
//! is read-and-write on every access, so it is built around a single
//! [`parking_lot::Mutex`] guarding an [`indexmap::IndexMap`] whose iteration
//! order doubles as (approximate) recency order: a hit moves its entry to
//! the back, and eviction pops from the front. "Approximate" because a
//! background janitor, not every read, is what actually reclaims expired
//! entries; see [`LruCache::spawn_janitor`].

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "flagstream::lru_cache";

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct LruState<K, V> {
    entries: IndexMap<K, Entry<V>>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> LruState<K, V> {
    fn touch(&mut self, key: &K) {
        if let Some(index) = self.entries.get_index_of(key) {
            // move_index is O(n) worst case; acceptable since capacity is
            // bounded and this only runs on a cache hit, not per lookup miss.
            self.entries.move_index(index, self.entries.len() - 1);
        }
    }

    fn insert(&mut self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        if self.entries.contains_key(&key) {
            self.entries.swap_remove(&key);
        }
        self.entries.insert(key, Entry { value, expires_at });
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }

    fn sweep_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }
}

/// A bounded cache mapping `K` to `V` with per-entry TTL expiry and
/// approximate LRU eviction once [`LruCache::capacity`] is exceeded.
pub struct LruCache<K, V> {
    state: Mutex<LruState<K, V>>,
    default_ttl: Duration,
    halt: Arc<Notify>,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Construct a cache bounded to `capacity` entries with `default_ttl`
    /// applied to every insert.
    pub fn new(capacity: usize, default_ttl: Duration) -> Arc<Self> {
        Arc::new(LruCache {
            state: Mutex::new(LruState {
                entries: IndexMap::with_capacity(capacity),
                capacity,
            }),
            default_ttl,
            halt: Arc::new(Notify::new()),
        })
    }

    /// Look up `key`. A hit that has not yet expired refreshes its recency
    /// and returns a clone of the value; an expired entry is treated as a
    /// miss (and is left for the janitor to reclaim, not removed inline, to
    /// keep this call allocation-free beyond the returned clone).
    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.state.lock();
        let hit = guard
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone());
        if hit.is_some() {
            guard.touch(key);
        }
        hit
    }

    /// Insert or replace `key` with `value`, using the cache's default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.state.lock().insert(key, value, self.default_ttl);
    }

    /// Insert or replace `key` with `value` using an explicit TTL, overriding
    /// the cache's default.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.state.lock().insert(key, value, ttl);
    }

    /// Remove `key`, if present.
    pub fn remove(&self, key: &K) {
        self.state.lock().entries.swap_remove(key);
    }

    /// Evict every entry. Used when the caller learns the underlying data
    /// source is stale and cached answers can no longer be trusted.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Current number of entries, including any not yet swept past expiry.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn a background task that periodically sweeps expired entries.
    /// Returns a handle the caller should keep; dropping it does not stop
    /// the task, call [`LruCache::stop_janitor`] for that.
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let halt = Arc::clone(&self.halt);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let removed = cache.state.lock().sweep_expired();
                        if removed > 0 {
                            tracing::debug!(target: LOG_TARGET, removed, "janitor swept expired entries");
                        }
                    }
                    _ = halt.notified() => {
                        tracing::debug!(target: LOG_TARGET, "janitor stopping");
                        return;
                    }
                }
            }
        })
    }

    /// Signal a running janitor task to stop at its next wakeup.
    pub fn stop_janitor(&self) {
        self.halt.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_and_miss() {
        let cache: Arc<LruCache<&str, i32>> = LruCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"missing"), None);
    }

    #[test]
    fn evicts_least_recently_used_past_capacity() {
        let cache: Arc<LruCache<&str, i32>> = LruCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" becomes the least recently used.
        cache.get(&"a");
        cache.insert("c", 3);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn expired_entry_is_treated_as_a_miss() {
        let cache: Arc<LruCache<&str, i32>> = LruCache::new(10, Duration::from_millis(0));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache: Arc<LruCache<&str, i32>> = LruCache::new(10, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_reclaims_expired_entries_in_the_background() {
        let cache: Arc<LruCache<&str, i32>> = LruCache::new(10, Duration::from_millis(50));
        cache.insert("a", 1);
        let handle = cache.spawn_janitor(Duration::from_millis(10));

        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;

        assert_eq!(cache.state.lock().entries.len(), 0);
        cache.stop_janitor();
        let _ = handle.await;
    }
}
