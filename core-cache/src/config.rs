//! Cache configuration.

use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::policy::{CachePolicy, EvictionStrategy};

/// Bounds for the in-process tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCacheConfig {
    pub max_entries: usize,
    pub max_size_bytes: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_size_bytes: 50 * 1024 * 1024,
        }
    }
}

impl MemoryCacheConfig {
    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    pub fn with_max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "memory max_entries must be greater than 0".to_string(),
            ));
        }
        if self.max_size_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "memory max_size_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounds and layout for the durable tier.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentCacheConfig {
    /// Prefix for every storage key owned by the cache
    pub namespace: String,
    pub max_entries: usize,
    pub max_size_bytes: u64,
    /// Victim order once expired entries are gone
    pub eviction_strategy: EvictionStrategy,
    /// Fraction of the limits cleanup shrinks to once it starts evicting
    pub cleanup_target_ratio: f64,
}

impl Default for PersistentCacheConfig {
    fn default() -> Self {
        Self {
            namespace: "cache:".to_string(),
            max_entries: 10_000,
            max_size_bytes: 100 * 1024 * 1024,
            eviction_strategy: EvictionStrategy::Lru,
            cleanup_target_ratio: 0.8,
        }
    }
}

impl PersistentCacheConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    pub fn with_max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn with_eviction_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.eviction_strategy = strategy;
        self
    }

    pub fn with_cleanup_target_ratio(mut self, ratio: f64) -> Self {
        self.cleanup_target_ratio = ratio;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(CacheError::InvalidConfig(
                "persistent namespace cannot be empty".to_string(),
            ));
        }
        if self.max_entries == 0 || self.max_size_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "persistent limits must be greater than 0".to_string(),
            ));
        }
        if !(self.cleanup_target_ratio > 0.0 && self.cleanup_target_ratio <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "cleanup_target_ratio must be in (0, 1], got {}",
                self.cleanup_target_ratio
            )));
        }
        Ok(())
    }

    pub(crate) fn target_size_bytes(&self) -> u64 {
        (self.max_size_bytes as f64 * self.cleanup_target_ratio) as u64
    }

    pub(crate) fn target_entries(&self) -> usize {
        (self.max_entries as f64 * self.cleanup_target_ratio) as usize
    }
}

/// Configuration for [`CacheManager`](crate::CacheManager).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub memory: MemoryCacheConfig,
    pub persistent: PersistentCacheConfig,
    pub default_policy: CachePolicy,
    /// Period of the background cleanup task; zero disables it
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory: MemoryCacheConfig::default(),
            persistent: PersistentCacheConfig::default(),
            default_policy: CachePolicy::default(),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl CacheConfig {
    pub fn with_memory(mut self, memory: MemoryCacheConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_persistent(mut self, persistent: PersistentCacheConfig) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_default_policy(mut self, policy: CachePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.memory.validate()?;
        self.persistent.validate()
    }
}
