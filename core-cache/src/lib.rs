//! # Core Cache
//!
//! Two-tier cache for the client core.
//!
//! ## Overview
//!
//! - [`MemoryCache`]: bounded LRU store with TTL expiry
//! - [`PersistentCache`]: durable store over a
//!   [`KeyValueStore`](bridge_traits::storage::KeyValueStore) with a metadata
//!   index and hysteresis-based cleanup
//! - [`CacheManager`]: composes both tiers behind one API, resolves
//!   per-pattern [`CachePolicy`] values and keeps hit/miss statistics
//!
//! ## Usage
//!
//! ```no_run
//! use bridge_traits::storage::InMemoryKeyValueStore;
//! use bridge_traits::time::SystemClock;
//! use core_cache::{CacheConfig, CacheManager, CachePolicy};
//! use std::sync::Arc;
//!
//! # async fn example() -> core_cache::Result<()> {
//! let manager = Arc::new(CacheManager::new(
//!     CacheConfig::default(),
//!     Arc::new(InMemoryKeyValueStore::new()),
//!     Arc::new(SystemClock),
//! )?);
//!
//! manager
//!     .register_policy("user:*", CachePolicy::default().with_persistent(true))
//!     .await;
//! manager.set("user:1", &serde_json::json!({"name": "A"}), None).await?;
//!
//! let user: Option<serde_json::Value> = manager.get("user:1").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod manager;
pub mod memory;
pub mod persistent;
pub mod policy;
pub mod stats;

pub use config::{CacheConfig, MemoryCacheConfig, PersistentCacheConfig};
pub use entry::{estimate_size, CacheEntry};
pub use error::{CacheError, Result};
pub use manager::CacheManager;
pub use memory::MemoryCache;
pub use persistent::{CleanupReport, EntryMetadata, PersistentCache};
pub use policy::{
    AlwaysPromote, CachePolicy, EvictionStrategy, KeyPattern, MinAccessCount, PolicyRegistry,
    PromotionStrategy,
};
pub use stats::CacheStats;
