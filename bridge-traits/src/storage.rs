//! Durable Key-Value Storage Abstraction
//!
//! Provides the byte-oriented storage primitive used by the persistent cache
//! tier and by the offline queue snapshot.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{BridgeError, Result};

/// Durable key-value storage trait
///
/// Abstracts platform-specific durable storage:
/// - iOS: file-backed store in the app container
/// - Android: DataStore / SQLite
/// - Desktop: SQLite (see `bridge-desktop`)
/// - Web: IndexedDB
///
/// Values are opaque bytes; callers own the encoding.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// async fn remember(store: &dyn KeyValueStore) -> Result<()> {
///     store.set("last_user", b"alice").await?;
///     let value = store.get("last_user").await?;
///     assert_eq!(value.as_deref(), Some(&b"alice"[..]));
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, replacing any previous value
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a value
    ///
    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// List all keys starting with `prefix`
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove several keys
    ///
    /// The default implementation removes keys one at a time and stops at the
    /// first failure. Implementations backed by a database should override it
    /// with a batched statement.
    async fn remove_multiple(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}

/// In-process `KeyValueStore` backed by an ordered map.
///
/// Useful for tests and for hosts that do not need durability across restarts.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| BridgeError::Storage("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn remove_multiple(&self, keys: &[String]) -> Result<()> {
        let mut data = self.lock()?;
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }
}
