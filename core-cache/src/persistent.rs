//! # Persistent Tier
//!
//! Durable cache on top of a [`KeyValueStore`].
//!
//! ## Layout
//!
//! Every storage key is prefixed with the configured namespace:
//!
//! - `{ns}entry:{key}`: JSON `{ value, createdAt, ttlSeconds }`
//! - `{ns}index`: JSON map of key to [`EntryMetadata`]
//!
//! The index is the source of truth for what the tier holds. It is loaded
//! lazily on first use and rewritten after every mutation, so size accounting
//! and eviction never need to read entry bodies.
//!
//! ## Failure Policy
//!
//! Reads are fail-open: a storage error or an undecodable entry is logged and
//! reported as a miss. Writes return the error so the caller can decide.
//!
//! ## Cleanup
//!
//! Cleanup runs in two phases. Expired entries go first. If the tier is still
//! over either limit, entries are evicted in [`EvictionStrategy`] order until
//! both size and count sit at or below `cleanup_target_ratio` of their limits.
//! Shrinking below the limit keeps back-to-back inserts from triggering an
//! eviction each.

use bridge_traits::storage::KeyValueStore;
use bridge_traits::time::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::config::PersistentCacheConfig;
use crate::entry::{expiry_of, is_expired_at, CacheEntry};
use crate::error::{CacheError, Result};
use crate::policy::EvictionStrategy;

/// Index record for one persisted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub created_at: i64,
    pub ttl_seconds: Option<u64>,
    pub size_bytes: u64,
    pub access_count: u64,
    pub last_accessed: i64,
}

impl EntryMetadata {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            created_at: entry.created_at,
            ttl_seconds: entry.ttl_seconds,
            size_bytes: entry.size_bytes,
            access_count: entry.access_count,
            last_accessed: entry.last_accessed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    value: Value,
    created_at: i64,
    ttl_seconds: Option<u64>,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: u64,
    pub evicted: u64,
}

impl CleanupReport {
    pub fn removed(&self) -> u64 {
        self.expired + self.evicted
    }
}

#[derive(Default)]
struct IndexState {
    index: HashMap<String, EntryMetadata>,
    total_size: u64,
    loaded: bool,
}

impl IndexState {
    fn forget(&mut self, key: &str) -> Option<EntryMetadata> {
        let metadata = self.index.remove(key)?;
        self.total_size = self.total_size.saturating_sub(metadata.size_bytes);
        Some(metadata)
    }

    fn record(&mut self, key: String, metadata: EntryMetadata) {
        self.total_size += metadata.size_bytes;
        if let Some(previous) = self.index.insert(key, metadata) {
            self.total_size = self.total_size.saturating_sub(previous.size_bytes);
        }
    }
}

pub struct PersistentCache {
    store: Arc<dyn KeyValueStore>,
    config: PersistentCacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<IndexState>,
    evictions: AtomicU64,
}

impl PersistentCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: PersistentCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            state: Mutex::new(IndexState::default()),
            evictions: AtomicU64::new(0),
        }
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}entry:{}", self.config.namespace, key)
    }

    fn index_key(&self) -> String {
        format!("{}index", self.config.namespace)
    }

    fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    async fn state(&self) -> MutexGuard<'_, IndexState> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            state.index = self.load_index().await;
            state.total_size = state.index.values().map(|m| m.size_bytes).sum();
            state.loaded = true;
            debug!(
                entries = state.index.len(),
                total_size = state.total_size,
                "Loaded persistent cache index"
            );
        }
        state
    }

    async fn load_index(&self) -> HashMap<String, EntryMetadata> {
        match self.store.get(&self.index_key()).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "Persistent cache index is corrupt, starting empty");
                HashMap::new()
            }),
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read persistent cache index, starting empty");
                HashMap::new()
            }
        }
    }

    async fn persist_index(&self, state: &IndexState) -> Result<()> {
        let bytes = serde_json::to_vec(&state.index)?;
        self.store.set(&self.index_key(), &bytes).await?;
        Ok(())
    }

    async fn persist_index_best_effort(&self, state: &IndexState) {
        if let Err(e) = self.persist_index(state).await {
            warn!(error = %e, "Failed to persist cache index");
        }
    }

    /// Read an entry. Never fails; storage problems read as a miss.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.now();
        let mut state = self.state().await;
        let metadata = state.index.get(key)?.clone();

        if is_expired_at(metadata.created_at, metadata.ttl_seconds, now) {
            debug!("Persistent entry expired on read");
            self.remove_entries(&mut state, &[key.to_string()]).await;
            return None;
        }

        let stored = match self.store.get(&self.entry_key(key)).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<StoredEntry>(&bytes) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(error = %e, "Undecodable persistent entry, treating as miss");
                    return None;
                }
            },
            Ok(None) => {
                warn!("Indexed entry missing from storage, dropping from index");
                state.forget(key);
                self.persist_index_best_effort(&state).await;
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Persistent read failed, treating as miss");
                return None;
            }
        };

        let metadata = match state.index.get_mut(key) {
            Some(metadata) => {
                metadata.access_count += 1;
                metadata.last_accessed = now;
                metadata.clone()
            }
            None => return None,
        };
        self.persist_index_best_effort(&state).await;

        Some(CacheEntry {
            key: key.to_string(),
            value: stored.value,
            created_at: metadata.created_at,
            ttl_seconds: metadata.ttl_seconds,
            size_bytes: metadata.size_bytes,
            access_count: metadata.access_count,
            last_accessed: metadata.last_accessed,
        })
    }

    /// Whether a live entry is indexed. Does not touch storage or access stats.
    pub async fn has(&self, key: &str) -> bool {
        let now = self.now();
        let mut state = self.state().await;
        match state.index.get(key) {
            Some(m) if is_expired_at(m.created_at, m.ttl_seconds, now) => {
                self.remove_entries(&mut state, &[key.to_string()]).await;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub async fn set(&self, key: &str, value: Value, ttl_seconds: Option<u64>) -> Result<()> {
        self.insert_entry(CacheEntry::new(key, value, ttl_seconds, self.now()))
            .await
    }

    /// Write a prepared entry, making room first if needed.
    #[instrument(skip(self, entry), fields(key = %entry.key, size = entry.size_bytes))]
    pub async fn insert_entry(&self, entry: CacheEntry) -> Result<()> {
        if entry.size_bytes > self.config.max_size_bytes {
            return Err(CacheError::EntryTooLarge {
                key: entry.key,
                size: entry.size_bytes,
                limit: self.config.max_size_bytes,
            });
        }

        let mut state = self.state().await;
        self.ensure_capacity(&mut state, &entry.key, entry.size_bytes).await;

        let stored = StoredEntry {
            value: entry.value.clone(),
            created_at: entry.created_at,
            ttl_seconds: entry.ttl_seconds,
        };
        let bytes = serde_json::to_vec(&stored)?;
        self.store.set(&self.entry_key(&entry.key), &bytes).await?;

        // Only a successful write replaces the previous index record
        state.record(entry.key.clone(), EntryMetadata::from_entry(&entry));
        self.persist_index(&state).await
    }

    /// Make room for `incoming_bytes` under `key`. An entry being overwritten
    /// does not count against the limits.
    async fn ensure_capacity(&self, state: &mut IndexState, key: &str, incoming_bytes: u64) {
        let (current_size, current_count) = match state.index.get(key) {
            Some(existing) => (
                state.total_size.saturating_sub(existing.size_bytes),
                state.index.len() - 1,
            ),
            None => (state.total_size, state.index.len()),
        };
        let over_size = current_size + incoming_bytes > self.config.max_size_bytes;
        let over_count = current_count + 1 > self.config.max_entries;
        if over_size || over_count {
            let report = self.cleanup_locked(state, incoming_bytes, 1).await;
            debug!(
                expired = report.expired,
                evicted = report.evicted,
                "Made room in persistent cache"
            );
        }
    }

    /// Remove expired entries, then evict down to the cleanup target if still over a limit.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> CleanupReport {
        let mut state = self.state().await;
        let report = self.cleanup_locked(&mut state, 0, 0).await;
        if report.removed() > 0 {
            info!(
                expired = report.expired,
                evicted = report.evicted,
                remaining = state.index.len(),
                "Persistent cache cleanup finished"
            );
        }
        report
    }

    async fn cleanup_locked(
        &self,
        state: &mut IndexState,
        reserve_bytes: u64,
        reserve_entries: usize,
    ) -> CleanupReport {
        let now = self.now();
        let mut report = CleanupReport::default();

        let expired: Vec<String> = state
            .index
            .iter()
            .filter(|(_, m)| is_expired_at(m.created_at, m.ttl_seconds, now))
            .map(|(key, _)| key.clone())
            .collect();
        report.expired = expired.len() as u64;
        for key in &expired {
            state.forget(key);
        }

        let over_limit = |state: &IndexState, max_bytes: u64, max_entries: usize| {
            state.total_size + reserve_bytes > max_bytes
                || state.index.len() + reserve_entries > max_entries
        };

        let mut evicted = Vec::new();
        if over_limit(state, self.config.max_size_bytes, self.config.max_entries) {
            let target_bytes = self.config.target_size_bytes();
            let target_entries = self.config.target_entries();

            for key in eviction_order(self.config.eviction_strategy, &state.index) {
                if !over_limit(state, target_bytes, target_entries) {
                    break;
                }
                state.forget(&key);
                evicted.push(key);
            }
        }
        report.evicted = evicted.len() as u64;
        self.evictions.fetch_add(report.evicted, Ordering::Relaxed);

        let removed: Vec<String> = expired
            .iter()
            .chain(evicted.iter())
            .map(|key| self.entry_key(key))
            .collect();
        if !removed.is_empty() {
            if let Err(e) = self.store.remove_multiple(&removed).await {
                warn!(
                    error = %e,
                    count = removed.len(),
                    "Failed to remove cache entries from storage"
                );
            }
            self.persist_index_best_effort(state).await;
        }

        report
    }

    async fn remove_entries(&self, state: &mut IndexState, keys: &[String]) {
        for key in keys {
            state.forget(key);
        }
        let storage_keys: Vec<String> = keys.iter().map(|k| self.entry_key(k)).collect();
        if let Err(e) = self.store.remove_multiple(&storage_keys).await {
            warn!(error = %e, "Failed to remove cache entries from storage");
        }
        self.persist_index_best_effort(state).await;
    }

    /// Remove an entry. Returns whether it was indexed; a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state().await;
        let existed = state.forget(key).is_some();
        self.store.remove(&self.entry_key(key)).await?;
        if existed {
            self.persist_index(&state).await?;
        }
        Ok(existed)
    }

    /// Remove every key under the namespace, including orphans the index lost track of.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let keys = self.store.list_keys(&self.config.namespace).await?;
        self.store.remove_multiple(&keys).await?;
        *state = IndexState {
            loaded: true,
            ..IndexState::default()
        };
        debug!(removed = keys.len(), "Cleared persistent cache");
        Ok(())
    }

    /// Indexed keys, including entries that have expired but not yet been cleaned.
    pub async fn keys(&self) -> Vec<String> {
        self.state().await.index.keys().cloned().collect()
    }

    pub async fn entry_count(&self) -> usize {
        self.state().await.index.len()
    }

    pub async fn total_size(&self) -> u64 {
        self.state().await.total_size
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &PersistentCacheConfig {
        &self.config
    }
}

/// Victims in the order they should go. Ties break on key for determinism.
fn eviction_order(
    strategy: EvictionStrategy,
    index: &HashMap<String, EntryMetadata>,
) -> Vec<String> {
    let mut candidates: Vec<(&String, &EntryMetadata)> = index.iter().collect();
    match strategy {
        EvictionStrategy::Lru => candidates.sort_by_key(|(k, m)| (m.last_accessed, *k)),
        EvictionStrategy::Fifo => candidates.sort_by_key(|(k, m)| (m.created_at, *k)),
        EvictionStrategy::Lfu => {
            candidates.sort_by_key(|(k, m)| (m.access_count, m.last_accessed, *k))
        }
        EvictionStrategy::Ttl => candidates.sort_by_key(|(k, m)| {
            (
                expiry_of(m.created_at, m.ttl_seconds).unwrap_or(i64::MAX),
                m.last_accessed,
                *k,
            )
        }),
    }
    candidates.into_iter().map(|(k, _)| k.clone()).collect()
}
