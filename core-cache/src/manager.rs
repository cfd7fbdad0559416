//! # Cache Manager
//!
//! Unified API over the memory and persistent tiers.
//!
//! ## Read Path
//!
//! 1. Memory tier. A hit returns immediately without touching storage.
//! 2. Persistent tier. A hit is promoted into memory when the configured
//!    [`PromotionStrategy`] agrees, keeping its original creation time and TTL.
//! 3. Both missed: the miss counter is bumped.
//!
//! ## Write Path
//!
//! Every write lands in memory. Keys whose resolved [`CachePolicy`] is
//! `persistent` are also written to the persistent tier, which makes the
//! memory copy a cache of the durable one rather than the authority.
//!
//! Writes and deletes touch storage first and memory second, and bump a write
//! epoch while holding the memory lock. A promotion compares the epoch seen at
//! its memory miss with the current one under the same lock and is dropped if
//! any write landed in between, so a slow storage read never replaces a newer
//! memory entry or revives a deleted one.
//!
//! ## Background Cleanup
//!
//! [`CacheManager::start_cleanup_task`] runs [`CacheManager::cleanup`] on the
//! configured interval until [`CacheManager::stop_cleanup_task`] is called or
//! the manager is dropped.

use bridge_traits::storage::KeyValueStore;
use bridge_traits::time::Clock;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::memory::MemoryCache;
use crate::persistent::{CleanupReport, PersistentCache};
use crate::policy::{AlwaysPromote, CachePolicy, KeyPattern, PolicyRegistry, PromotionStrategy};
use crate::stats::{CacheStats, Counters};

struct CleanupTask {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct CacheManager {
    config: CacheConfig,
    memory: Mutex<MemoryCache>,
    persistent: PersistentCache,
    policies: RwLock<PolicyRegistry>,
    promotion: Arc<dyn PromotionStrategy>,
    counters: Counters,
    /// Only changed while `memory` is locked
    write_epoch: AtomicU64,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    cleanup_task: StdMutex<Option<CleanupTask>>,
}

impl CacheManager {
    /// Create a manager over `store`. Fails if `config` is invalid.
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            memory: Mutex::new(MemoryCache::new(config.memory.clone(), clock.clone())),
            persistent: PersistentCache::new(store, config.persistent.clone(), clock.clone()),
            policies: RwLock::new(PolicyRegistry::new(config.default_policy.clone())),
            promotion: Arc::new(AlwaysPromote),
            counters: Counters::default(),
            write_epoch: AtomicU64::new(0),
            clock,
            event_bus: None,
            cleanup_task: StdMutex::new(None),
            config,
        })
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_promotion_strategy(mut self, strategy: Arc<dyn PromotionStrategy>) -> Self {
        self.promotion = strategy;
        self
    }

    /// Lock the memory tier for a write, invalidating in-flight promotions.
    async fn memory_for_write(&self) -> MutexGuard<'_, MemoryCache> {
        let memory = self.memory.lock().await;
        self.write_epoch.fetch_add(1, Ordering::AcqRel);
        memory
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Cache(event)).ok();
        }
    }

    // ------------------------------------------------------------------
    // Policies
    // ------------------------------------------------------------------

    /// Register a policy for keys matching `pattern`. Earlier registrations win.
    pub async fn register_policy(&self, pattern: impl Into<KeyPattern>, policy: CachePolicy) {
        let pattern = pattern.into();
        debug!(pattern = %pattern, persistent = policy.persistent, "Registered cache policy");
        self.policies.write().await.register(pattern, policy);
    }

    /// Policy that applies to `key`.
    pub async fn get_cache_policy(&self, key: &str) -> CachePolicy {
        self.policies.read().await.resolve(key).clone()
    }

    // ------------------------------------------------------------------
    // Single-key operations
    // ------------------------------------------------------------------

    /// Read and deserialize a value.
    ///
    /// Storage failures read as a miss; only a value that no longer matches
    /// `T` produces an error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_value(key).await {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Read the raw JSON value.
    #[instrument(skip(self))]
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        let (memory_hit, epoch) = {
            let mut memory = self.memory.lock().await;
            (memory.get(key), self.write_epoch.load(Ordering::Acquire))
        };
        if let Some(value) = memory_hit {
            self.counters.record_memory_hit();
            return Some(value);
        }

        let Some(entry) = self.persistent.get(key).await else {
            self.counters.record_miss();
            debug!("Cache miss");
            return None;
        };
        self.counters.record_persistent_hit();

        let policy = self.get_cache_policy(key).await;
        if !self.promotion.should_promote(&entry, &policy) {
            return Some(entry.value);
        }

        let value = entry.value.clone();
        let mut memory = self.memory.lock().await;
        if self.write_epoch.load(Ordering::Acquire) != epoch {
            debug!("Skipped promotion, a write landed during the storage read");
        } else if let Err(e) = memory.insert_entry(entry) {
            debug!(error = %e, "Skipped promotion into memory");
        }
        Some(value)
    }

    /// Store a value.
    ///
    /// `ttl_seconds` overrides the policy TTL when given. The value always
    /// goes to memory; it also goes to storage when the policy is persistent,
    /// and a storage failure is returned.
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let policy = self.get_cache_policy(key).await;
        let entry = CacheEntry::new(
            key,
            value,
            ttl_seconds.or(policy.ttl_seconds),
            self.clock.unix_timestamp_millis(),
        );

        if entry.size_bytes > policy.max_size_bytes {
            return Err(CacheError::EntryTooLarge {
                key: key.to_string(),
                size: entry.size_bytes,
                limit: policy.max_size_bytes,
            });
        }

        if !policy.persistent {
            return self.memory_for_write().await.insert_entry(entry);
        }

        let persisted = self.persistent.insert_entry(entry.clone()).await;
        if let Err(e) = &persisted {
            warn!(error = %e, "Persistent write failed, value cached in memory only");
        }
        if let Err(e) = self.memory_for_write().await.insert_entry(entry) {
            debug!(error = %e, "Entry kept in persistent tier only");
        }
        persisted
    }

    /// Whether a live entry exists in either tier.
    pub async fn has(&self, key: &str) -> bool {
        let in_memory = self.memory.lock().await.has(key);
        in_memory || self.persistent.has(key).await
    }

    /// Remove a key from both tiers. Returns whether either tier held it.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let in_storage = self.persistent.delete(key).await;
        let in_memory = self.memory_for_write().await.delete(key);
        Ok(in_storage? || in_memory)
    }

    /// Remove every key matching a glob from both tiers.
    #[instrument(skip(self))]
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let pattern = KeyPattern::new(pattern);
        let mut removed = HashSet::new();

        for key in self.persistent.keys().await {
            if pattern.matches(&key) && self.persistent.delete(&key).await? {
                removed.insert(key);
            }
        }

        {
            let mut memory = self.memory_for_write().await;
            for key in memory.keys() {
                if pattern.matches(&key) && memory.delete(&key) {
                    removed.insert(key);
                }
            }
        }

        let removed = removed.len() as u64;
        info!(pattern = %pattern, removed, "Invalidated cache pattern");
        self.emit(CacheEvent::PatternInvalidated {
            pattern: pattern.to_string(),
            removed,
        });
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Batch operations
    // ------------------------------------------------------------------

    /// Read several keys concurrently. Misses are left out of the map.
    pub async fn get_multiple<T: DeserializeOwned>(
        &self,
        keys: &[&str],
    ) -> Result<HashMap<String, T>> {
        let values = join_all(keys.iter().map(|key| self.get::<T>(key))).await;

        let mut found = HashMap::new();
        for (key, value) in keys.iter().zip(values) {
            if let Some(value) = value? {
                found.insert((*key).to_string(), value);
            }
        }
        Ok(found)
    }

    /// Write several entries concurrently. Each key succeeds or fails on its own.
    pub async fn set_multiple<T: Serialize>(
        &self,
        entries: &[(&str, T)],
        ttl_seconds: Option<u64>,
    ) -> Vec<Result<()>> {
        join_all(
            entries
                .iter()
                .map(|(key, value)| self.set(key, value, ttl_seconds)),
        )
        .await
    }

    /// Delete several keys concurrently.
    pub async fn delete_multiple(&self, keys: &[&str]) -> Vec<Result<bool>> {
        join_all(keys.iter().map(|key| self.delete(key))).await
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Drop expired entries from both tiers and shrink storage if over its limits.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> CleanupReport {
        let memory_expired = self.memory.lock().await.cleanup() as u64;
        let persistent = self.persistent.cleanup().await;

        let report = CleanupReport {
            expired: memory_expired + persistent.expired,
            evicted: persistent.evicted,
        };
        self.counters.mark_cleanup(self.clock.now());

        debug!(
            expired = report.expired,
            evicted = report.evicted,
            "Cache cleanup completed"
        );
        self.emit(CacheEvent::CleanupCompleted {
            expired: report.expired,
            evicted: report.evicted,
        });
        report
    }

    pub async fn get_stats(&self) -> CacheStats {
        let (memory_entries, memory_size_bytes, memory_evictions) = {
            let memory = self.memory.lock().await;
            (memory.len(), memory.size_bytes(), memory.evictions())
        };
        let persistent_entries = self.persistent.entry_count().await;
        let persistent_size_bytes = self.persistent.total_size().await;

        let counters = self.counters.snapshot();
        let (hit_rate, miss_rate) = counters.rates();

        CacheStats {
            memory_entries,
            memory_size_bytes,
            memory_max_size_bytes: self.config.memory.max_size_bytes,
            persistent_entries,
            persistent_size_bytes,
            persistent_max_size_bytes: self.config.persistent.max_size_bytes,
            total_entries: memory_entries + persistent_entries,
            total_size_bytes: memory_size_bytes + persistent_size_bytes,
            memory_hits: counters.memory_hits,
            persistent_hits: counters.persistent_hits,
            hits: counters.hits(),
            misses: counters.misses,
            hit_rate,
            miss_rate,
            evictions: memory_evictions + self.persistent.evictions(),
            last_cleanup: counters.last_cleanup,
        }
    }

    /// Empty both tiers.
    pub async fn clear(&self) -> Result<()> {
        let cleared = self.persistent.clear().await;
        self.memory_for_write().await.clear();
        cleared
    }

    /// Empty the memory tier only. Persistent entries are promoted again on read.
    pub async fn clear_memory_tier(&self) {
        self.memory.lock().await.clear();
    }

    /// Evict the `count` least recently used memory entries.
    pub async fn evict_memory_lru(&self, count: usize) -> usize {
        self.memory.lock().await.evict_lru(count)
    }

    // ------------------------------------------------------------------
    // Background cleanup
    // ------------------------------------------------------------------

    /// Start periodic cleanup. No-op if already running or the interval is zero.
    ///
    /// The task holds a weak reference and exits once the manager is dropped.
    pub fn start_cleanup_task(self: &Arc<Self>) {
        let period = self.config.cleanup_interval;
        if period.is_zero() {
            debug!("Background cache cleanup disabled");
            return;
        }

        let Ok(mut slot) = self.cleanup_task.lock() else {
            warn!("Cleanup task slot poisoned, not starting");
            return;
        };
        if slot.is_some() {
            return;
        }

        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();
        let manager = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        manager.cleanup().await;
                    }
                }
            }
            debug!("Cache cleanup task stopped");
        });

        info!(interval_secs = period.as_secs(), "Started background cache cleanup");
        *slot = Some(CleanupTask {
            cancellation_token,
            handle,
        });
    }

    /// Stop periodic cleanup and wait for the task to finish.
    pub async fn stop_cleanup_task(&self) {
        let task = match self.cleanup_task.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            task.cancellation_token.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Cache cleanup task ended abnormally");
            }
        }
    }

    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup_task
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.cleanup_task.lock() {
            if let Some(task) = slot.take() {
                task.cancellation_token.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use bridge_traits::storage::InMemoryKeyValueStore;
    use bridge_traits::time::ManualClock;
    use mockall::mock;
    use serde_json::json;
    use std::time::Duration;

    fn manager() -> (CacheManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let manager = CacheManager::new(
            CacheConfig::default(),
            Arc::new(InMemoryKeyValueStore::new()),
            clock.clone(),
        )
        .unwrap();
        (manager, clock)
    }

    #[tokio::test]
    async fn test_non_persistent_policy_stays_in_memory() {
        let (manager, _) = manager();
        manager.set("session:1", &json!("token"), None).await.unwrap();

        assert_eq!(manager.get_stats().await.persistent_entries, 0);
        manager.clear_memory_tier().await;
        assert_eq!(manager.get::<String>("session:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_policy_ttl_applies_when_none_given() {
        let (manager, clock) = manager();
        manager
            .register_policy("otp:*", CachePolicy::default().with_ttl_seconds(Some(30)))
            .await;
        manager.set("otp:login", &"123456", None).await.unwrap();
        manager.set("otp:override", &"654321", Some(120)).await.unwrap();

        clock.advance(Duration::from_secs(30));
        assert!(!manager.has("otp:login").await);
        assert!(manager.has("otp:override").await);
    }

    #[tokio::test]
    async fn test_policy_size_limit_rejects_entry() {
        let (manager, _) = manager();
        manager
            .register_policy("tiny:*", CachePolicy::default().with_max_size_bytes(4))
            .await;

        let result = manager.set("tiny:1", &"too big", None).await;
        assert!(matches!(result, Err(CacheError::EntryTooLarge { limit: 4, .. })));
        assert!(!manager.has("tiny:1").await);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_serialization_error() {
        let (manager, _) = manager();
        manager.set("count", &42, None).await.unwrap();

        let result = manager.get::<String>("count").await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_invalidate_pattern_spans_tiers() {
        let (manager, _) = manager();
        manager
            .register_policy("user:*", CachePolicy::default().with_persistent(true))
            .await;
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let manager = manager.with_event_bus(bus);

        manager.set("user:1", &json!({"id": 1}), None).await.unwrap();
        manager.set("user:2", &json!({"id": 2}), None).await.unwrap();
        manager.set("post:1", &json!({"id": 1}), None).await.unwrap();

        assert_eq!(manager.invalidate_pattern("user:*").await.unwrap(), 2);
        assert!(!manager.has("user:1").await);
        assert!(manager.has("post:1").await);
        assert_eq!(manager.get_stats().await.persistent_entries, 0);

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            CoreEvent::Cache(CacheEvent::PatternInvalidated {
                pattern: "user:*".to_string(),
                removed: 2,
            })
        );
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let (manager, _) = manager();
        manager.set("a", &1, None).await.unwrap();

        manager.get::<i32>("a").await.unwrap();
        manager.get::<i32>("a").await.unwrap();
        manager.get::<i32>("a").await.unwrap();
        manager.get::<i32>("missing").await.unwrap();

        let stats = manager.get_stats().await;
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.memory_hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.75);
        assert_eq!(stats.miss_rate, 0.25);
        assert_eq!(stats.memory_entries, 1);
        assert!(stats.last_cleanup.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_records_timestamp() {
        let (manager, clock) = manager();
        manager.set("short", &1, Some(1)).await.unwrap();
        clock.advance(Duration::from_secs(5));

        let report = manager.cleanup().await;
        assert_eq!(report.expired, 1);
        assert_eq!(manager.get_stats().await.last_cleanup, Some(clock.now()));
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let (manager, _) = manager();
        let results = manager
            .set_multiple(&[("a", 1), ("b", 2), ("c", 3)], None)
            .await;
        assert!(results.iter().all(|r| r.is_ok()));

        let found: HashMap<String, i32> = manager.get_multiple(&["a", "c", "zzz"]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["c"], 3);

        let deleted = manager.delete_multiple(&["a", "zzz"]).await;
        assert!(matches!(deleted[0], Ok(true)));
        assert!(matches!(deleted[1], Ok(false)));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = CacheConfig::default()
            .with_memory(crate::config::MemoryCacheConfig::default().with_max_entries(0));
        let result = CacheManager::new(
            config,
            Arc::new(InMemoryKeyValueStore::new()),
            Arc::new(ManualClock::default()),
        );
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    mock! {
        Store {}

        #[async_trait::async_trait]
        impl KeyValueStore for Store {
            async fn get(&self, key: &str) -> bridge_traits::error::Result<Option<Vec<u8>>>;
            async fn set(&self, key: &str, value: &[u8]) -> bridge_traits::error::Result<()>;
            async fn remove(&self, key: &str) -> bridge_traits::error::Result<()>;
            async fn list_keys(&self, prefix: &str) -> bridge_traits::error::Result<Vec<String>>;
            async fn remove_multiple(&self, keys: &[String]) -> bridge_traits::error::Result<()>;
        }
    }

    #[tokio::test]
    async fn test_persistent_write_failure_keeps_memory_copy() {
        let mut store = MockStore::new();
        store.expect_get().returning(|_| Ok(None));
        store
            .expect_set()
            .returning(|_, _| Err(BridgeError::Storage("disk full".to_string())));

        let manager = CacheManager::new(
            CacheConfig::default(),
            Arc::new(store),
            Arc::new(ManualClock::default()),
        )
        .unwrap();
        manager
            .register_policy("user:*", CachePolicy::default().with_persistent(true))
            .await;

        let result = manager.set("user:1", &"Ada", None).await;
        assert!(matches!(result, Err(CacheError::Storage(_))));

        assert_eq!(
            manager.get::<String>("user:1").await.unwrap(),
            Some("Ada".to_string())
        );
        let stats = manager.get_stats().await;
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.persistent_entries, 0);
    }
}
