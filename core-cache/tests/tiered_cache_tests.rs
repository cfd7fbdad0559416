//! Tests for the tiered cache manager
//!
//! These tests drive the manager end to end over an in-memory store that
//! counts storage reads, so tier behavior is observable from outside.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::storage::{InMemoryKeyValueStore, KeyValueStore};
use bridge_traits::time::ManualClock;
use core_cache::{
    CacheConfig, CacheManager, CachePolicy, MemoryCacheConfig, MinAccessCount,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct CountingStore {
    inner: InMemoryKeyValueStore,
    entry_reads: AtomicUsize,
}

impl CountingStore {
    fn entry_reads(&self) -> usize {
        self.entry_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for CountingStore {
    async fn get(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        if key.contains(":entry:") {
            self.entry_reads.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> BridgeResult<()> {
        self.inner.remove(key).await
    }

    async fn list_keys(&self, prefix: &str) -> BridgeResult<Vec<String>> {
        self.inner.list_keys(prefix).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    name: String,
}

fn user(name: &str) -> User {
    User {
        name: name.to_string(),
    }
}

async fn setup(config: CacheConfig) -> (Arc<CacheManager>, Arc<CountingStore>, Arc<ManualClock>) {
    let store = Arc::new(CountingStore::default());
    let clock = Arc::new(ManualClock::default());
    let manager = CacheManager::new(config, store.clone(), clock.clone()).unwrap();
    manager
        .register_policy(
            "user:*",
            CachePolicy::default()
                .with_persistent(true)
                .with_ttl_seconds(Some(3600)),
        )
        .await;
    (Arc::new(manager), store, clock)
}

#[tokio::test]
async fn test_persistent_value_survives_memory_eviction() {
    let (manager, store, _) = setup(CacheConfig::default()).await;

    manager.set("user:1", &user("A"), None).await.unwrap();
    assert_eq!(manager.get::<User>("user:1").await.unwrap(), Some(user("A")));
    assert_eq!(store.entry_reads(), 0);

    assert_eq!(manager.evict_memory_lru(1).await, 1);
    assert_eq!(manager.get::<User>("user:1").await.unwrap(), Some(user("A")));
    assert_eq!(store.entry_reads(), 1);

    let stats = manager.get_stats().await;
    assert_eq!(stats.memory_hits, 1);
    assert_eq!(stats.persistent_hits, 1);
    assert_eq!(stats.memory_entries, 1);
}

#[tokio::test]
async fn test_promoted_entry_served_from_memory() {
    let (manager, store, _) = setup(CacheConfig::default()).await;
    manager.set("user:2", &user("B"), None).await.unwrap();
    manager.clear_memory_tier().await;

    manager.get::<User>("user:2").await.unwrap();
    let reads_after_promotion = store.entry_reads();

    for _ in 0..5 {
        assert_eq!(manager.get::<User>("user:2").await.unwrap(), Some(user("B")));
    }
    assert_eq!(store.entry_reads(), reads_after_promotion);
}

#[tokio::test]
async fn test_promotion_keeps_original_expiry() {
    let (manager, _, clock) = setup(CacheConfig::default()).await;
    manager.set("user:3", &user("C"), Some(10)).await.unwrap();
    manager.clear_memory_tier().await;

    clock.advance(Duration::from_secs(6));
    assert!(manager.get::<User>("user:3").await.unwrap().is_some());

    // Promotion must not restart the TTL
    clock.advance(Duration::from_secs(4));
    assert!(manager.get::<User>("user:3").await.unwrap().is_none());
}

#[tokio::test]
async fn test_promotion_strategy_can_defer() {
    let store = Arc::new(CountingStore::default());
    let manager = CacheManager::new(
        CacheConfig::default(),
        store.clone(),
        Arc::new(ManualClock::default()),
    )
    .unwrap()
    .with_promotion_strategy(Arc::new(MinAccessCount(2)));
    manager
        .register_policy("user:*", CachePolicy::default().with_persistent(true))
        .await;

    manager.set("user:4", &user("D"), None).await.unwrap();
    manager.clear_memory_tier().await;

    // First read has access_count 1: served but not promoted
    manager.get::<User>("user:4").await.unwrap();
    manager.get::<User>("user:4").await.unwrap();
    manager.get::<User>("user:4").await.unwrap();
    assert_eq!(store.entry_reads(), 2);
}

#[tokio::test]
async fn test_memory_bound_holds_across_writes() {
    let config = CacheConfig::default().with_memory(
        MemoryCacheConfig::default()
            .with_max_entries(3)
            .with_max_size_bytes(1024),
    );
    let (manager, _, _) = setup(config).await;

    for i in 0..20 {
        manager
            .set(&format!("item:{i}"), &format!("value-{i}"), None)
            .await
            .unwrap();
        let stats = manager.get_stats().await;
        assert!(stats.memory_entries <= 3);
        assert!(stats.memory_size_bytes <= 1024);
    }
    assert_eq!(manager.get_stats().await.evictions, 17);
}

#[tokio::test]
async fn test_delete_missing_key_is_noop() {
    let (manager, _, _) = setup(CacheConfig::default()).await;
    assert!(!manager.delete("user:missing").await.unwrap());
    assert!(!manager.delete("nothing").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_background_cleanup_runs_on_interval() {
    let config = CacheConfig::default().with_cleanup_interval(Duration::from_secs(60));
    let (manager, _, clock) = setup(config).await;

    manager.set("user:5", &user("E"), Some(1)).await.unwrap();
    clock.advance(Duration::from_secs(2));

    manager.start_cleanup_task();
    assert!(manager.is_cleanup_running());
    assert!(manager.get_stats().await.last_cleanup.is_none());

    tokio::time::sleep(Duration::from_secs(61)).await;

    let stats = manager.get_stats().await;
    assert!(stats.last_cleanup.is_some());
    assert_eq!(stats.persistent_entries, 0);
    assert_eq!(stats.memory_entries, 0);

    manager.stop_cleanup_task().await;
    assert!(!manager.is_cleanup_running());
}

#[tokio::test]
async fn test_zero_interval_disables_cleanup() {
    let config = CacheConfig::default().with_cleanup_interval(Duration::ZERO);
    let (manager, _, _) = setup(config).await;

    manager.start_cleanup_task();
    assert!(!manager.is_cleanup_running());
}

#[tokio::test]
async fn test_clear_empties_both_tiers() {
    let (manager, _, _) = setup(CacheConfig::default()).await;
    manager.set("user:6", &user("F"), None).await.unwrap();
    manager.set("temp", &1, None).await.unwrap();

    manager.clear().await.unwrap();

    let stats = manager.get_stats().await;
    assert_eq!(stats.total_entries, 0);
    assert!(!manager.has("user:6").await);
}

/// Holds the next read of one key until released.
#[derive(Default)]
struct GatedStore {
    inner: InMemoryKeyValueStore,
    gated_key: Mutex<Option<String>>,
    parked: Notify,
    release: Notify,
}

impl GatedStore {
    fn gate(&self, key: &str) {
        *self.gated_key.lock().unwrap() = Some(key.to_string());
    }
}

#[async_trait]
impl KeyValueStore for GatedStore {
    async fn get(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        let gated = {
            let mut gated_key = self.gated_key.lock().unwrap();
            if gated_key.as_deref() == Some(key) {
                gated_key.take();
                true
            } else {
                false
            }
        };
        if gated {
            self.parked.notify_one();
            self.release.notified().await;
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> BridgeResult<()> {
        self.inner.remove(key).await
    }

    async fn list_keys(&self, prefix: &str) -> BridgeResult<Vec<String>> {
        self.inner.list_keys(prefix).await
    }
}

/// A manager with `user:1 = old` in storage only and the next storage read of it held.
async fn manager_with_slow_read() -> (Arc<CacheManager>, Arc<GatedStore>) {
    let store = Arc::new(GatedStore::default());
    let manager = CacheManager::new(
        CacheConfig::default(),
        store.clone(),
        Arc::new(ManualClock::default()),
    )
    .unwrap();
    manager
        .register_policy("user:*", CachePolicy::default().with_persistent(true))
        .await;
    manager.set("user:1", &user("old"), None).await.unwrap();
    manager.clear_memory_tier().await;
    store.gate("cache:entry:user:1");
    (Arc::new(manager), store)
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_slow_promotion_does_not_hide_newer_write() {
    let (manager, store) = manager_with_slow_read().await;

    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get::<User>("user:1").await })
    };
    store.parked.notified().await;

    let writer = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.set("user:1", &user("new"), None).await })
    };
    settle().await;
    store.release.notify_one();

    reader.await.unwrap().unwrap();
    writer.await.unwrap().unwrap();

    assert_eq!(manager.get::<User>("user:1").await.unwrap(), Some(user("new")));
    manager.clear_memory_tier().await;
    assert_eq!(manager.get::<User>("user:1").await.unwrap(), Some(user("new")));
}

#[tokio::test]
async fn test_slow_promotion_does_not_revive_deleted_key() {
    let (manager, store) = manager_with_slow_read().await;

    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get::<User>("user:1").await })
    };
    store.parked.notified().await;

    let deleter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.delete("user:1").await })
    };
    settle().await;
    store.release.notify_one();

    reader.await.unwrap().unwrap();
    assert!(deleter.await.unwrap().unwrap());

    assert_eq!(manager.get::<User>("user:1").await.unwrap(), None);
}
