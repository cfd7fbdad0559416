//! # Memory Tier
//!
//! Bounded in-process store with LRU ordering and TTL expiry.
//!
//! Recency is tracked by [`lru::LruCache`], which keeps a doubly-linked list
//! alongside a key index so lookups, promotions and evictions are O(1). The
//! `LruCache` itself is unbounded; both bounds (entry count and estimated
//! bytes) are enforced here before each insert.
//!
//! The tier is not internally synchronized. [`CacheManager`](crate::CacheManager)
//! serializes access behind a mutex.

use bridge_traits::time::Clock;
use lru::LruCache;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::MemoryCacheConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};

pub struct MemoryCache {
    entries: LruCache<String, CacheEntry>,
    config: MemoryCacheConfig,
    clock: Arc<dyn Clock>,
    size_bytes: u64,
    evictions: u64,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: LruCache::unbounded(),
            config,
            clock,
            size_bytes: 0,
            evictions: 0,
        }
    }

    fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    /// Look up a value, marking it most recently used.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Like [`get`](Self::get) but returns the entry with its bookkeeping.
    pub fn get_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let now = self.now();
        if self.entries.peek(key)?.is_expired(now) {
            trace!(key, "Memory entry expired on read");
            self.remove(key);
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.touch(now);
        Some(entry.clone())
    }

    /// Whether a live entry exists. Does not change recency.
    pub fn has(&mut self, key: &str) -> bool {
        let now = self.now();
        match self.entries.peek(key) {
            Some(entry) if entry.is_expired(now) => {
                self.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Insert or overwrite a value.
    pub fn set(&mut self, key: &str, value: Value, ttl_seconds: Option<u64>) -> Result<()> {
        let entry = CacheEntry::new(key, value, ttl_seconds, self.now());
        self.insert_entry(entry)
    }

    /// Insert a prepared entry, keeping its timestamps.
    ///
    /// Least recently used entries are evicted until both bounds leave room.
    /// An entry that could never fit is rejected.
    pub fn insert_entry(&mut self, entry: CacheEntry) -> Result<()> {
        if entry.size_bytes > self.config.max_size_bytes {
            return Err(CacheError::EntryTooLarge {
                key: entry.key,
                size: entry.size_bytes,
                limit: self.config.max_size_bytes,
            });
        }

        self.remove(&entry.key);

        while !self.entries.is_empty()
            && (self.entries.len() >= self.config.max_entries
                || self.size_bytes + entry.size_bytes > self.config.max_size_bytes)
        {
            if let Some((evicted_key, evicted)) = self.entries.pop_lru() {
                self.size_bytes -= evicted.size_bytes;
                self.evictions += 1;
                debug!(key = %evicted_key, size = evicted.size_bytes, "Evicted memory entry");
            }
        }

        self.size_bytes += entry.size_bytes;
        self.entries.put(entry.key.clone(), entry);
        Ok(())
    }

    /// Remove an entry. Returns whether it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove(key).is_some()
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.size_bytes -= entry.size_bytes;
        Some(entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.size_bytes = 0;
    }

    /// Evict the `count` least recently used entries.
    pub fn evict_lru(&mut self, count: usize) -> usize {
        let mut evicted = 0;
        while evicted < count {
            let Some((_, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.size_bytes -= entry.size_bytes;
            self.evictions += 1;
            evicted += 1;
        }
        evicted
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let now = self.now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Keys currently held, most recently used first. May include expired entries.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Entries removed to satisfy a bound, since creation.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::estimate_size;
    use bridge_traits::time::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    fn cache(max_entries: usize, max_size_bytes: u64) -> (MemoryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = MemoryCacheConfig::default()
            .with_max_entries(max_entries)
            .with_max_size_bytes(max_size_bytes);
        (MemoryCache::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_set_and_get() {
        let (mut cache, _) = cache(10, 10_000);
        cache.set("a", json!({"name": "A"}), None).unwrap();

        assert_eq!(cache.get("a"), Some(json!({"name": "A"})));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.size_bytes(), estimate_size(&json!({"name": "A"})));
    }

    #[test]
    fn test_entry_bound_evicts_least_recently_used() {
        let (mut cache, _) = cache(2, 10_000);
        cache.set("a", json!(1), None).unwrap();
        cache.set("b", json!(2), None).unwrap();

        // Touch "a" so "b" becomes the LRU entry
        cache.get("a");
        cache.set("c", json!(3), None).unwrap();

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn test_size_bound_evicts_until_fit() {
        // Each "xxxx" string costs 12 bytes
        let (mut cache, _) = cache(100, 30);
        cache.set("a", json!("xxxx"), None).unwrap();
        cache.set("b", json!("xxxx"), None).unwrap();
        cache.set("c", json!("xxxx"), None).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.size_bytes() <= 30);
        assert!(!cache.has("a"));
    }

    #[test]
    fn test_bounds_hold_after_every_set() {
        let (mut cache, _) = cache(5, 200);
        for i in 0..50 {
            let value = json!("v".repeat(i % 7));
            let _ = cache.set(&format!("k{}", i % 13), value, None);
            assert!(cache.len() <= 5);
            assert!(cache.size_bytes() <= 200);
        }
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let (mut cache, _) = cache(10, 10);
        cache.set("small", json!(1), None).unwrap();

        let result = cache.set("big", json!("far too large for this cache"), None);
        assert!(matches!(result, Err(CacheError::EntryTooLarge { .. })));
        assert!(cache.has("small"));
    }

    #[test]
    fn test_overwrite_replaces_size() {
        let (mut cache, _) = cache(10, 10_000);
        cache.set("a", json!("long value here"), None).unwrap();
        cache.set("a", json!(1), None).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), estimate_size(&json!(1)));
    }

    #[test]
    fn test_ttl_expiry_on_read() {
        let (mut cache, clock) = cache(10, 10_000);
        cache.set("a", json!("v"), Some(1)).unwrap();

        clock.advance(Duration::from_millis(999));
        assert_eq!(cache.get("a"), Some(json!("v")));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let (mut cache, _) = cache(10, 10_000);
        cache.set("a", json!("v"), Some(0)).unwrap();
        assert!(!cache.has("a"));
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let (mut cache, clock) = cache(10, 10_000);
        cache.set("short", json!(1), Some(1)).unwrap();
        cache.set("long", json!(2), Some(60)).unwrap();
        cache.set("forever", json!(3), None).unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_evict_lru_and_delete() {
        let (mut cache, _) = cache(10, 10_000);
        for key in ["a", "b", "c"] {
            cache.set(key, json!(key), None).unwrap();
        }

        assert_eq!(cache.evict_lru(2), 2);
        assert_eq!(cache.keys(), vec!["c".to_string()]);
        assert_eq!(cache.evict_lru(5), 1);

        // Deleting a missing key is a no-op
        assert!(!cache.delete("a"));
    }

    #[test]
    fn test_get_entry_tracks_access() {
        let (mut cache, clock) = cache(10, 10_000);
        cache.set("a", json!(1), None).unwrap();
        clock.advance(Duration::from_secs(3));

        let entry = cache.get_entry("a").unwrap();
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.last_accessed - entry.created_at, 3_000);
    }
}
