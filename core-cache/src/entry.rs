//! Cache entries and size accounting.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Size charged for a value whose JSON form cannot be produced.
pub const FALLBACK_ENTRY_SIZE: u64 = 1024;

/// A cached value with its bookkeeping.
///
/// Timestamps are Unix milliseconds taken from the injected clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: i64,
    /// `None` never expires; `Some(0)` is already expired.
    pub ttl_seconds: Option<u64>,
    pub size_bytes: u64,
    pub access_count: u64,
    pub last_accessed: i64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Value, ttl_seconds: Option<u64>, now: i64) -> Self {
        let size_bytes = estimate_size(&value);
        Self {
            key: key.into(),
            value,
            created_at: now,
            ttl_seconds,
            size_bytes,
            access_count: 0,
            last_accessed: now,
        }
    }

    /// Unix millisecond at which the entry expires, if it has a TTL.
    pub fn expires_at(&self) -> Option<i64> {
        expiry_of(self.created_at, self.ttl_seconds)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        is_expired_at(self.created_at, self.ttl_seconds, now)
    }

    /// Record a read.
    pub fn touch(&mut self, now: i64) {
        self.access_count += 1;
        self.last_accessed = now;
    }
}

pub(crate) fn expiry_of(created_at: i64, ttl_seconds: Option<u64>) -> Option<i64> {
    ttl_seconds.map(|ttl| {
        let ttl_ms = i64::try_from(ttl.saturating_mul(1000)).unwrap_or(i64::MAX);
        created_at.saturating_add(ttl_ms)
    })
}

pub(crate) fn is_expired_at(created_at: i64, ttl_seconds: Option<u64>, now: i64) -> bool {
    match expiry_of(created_at, ttl_seconds) {
        Some(expires_at) => now >= expires_at,
        None => false,
    }
}

/// Estimate the in-memory cost of a value.
///
/// Charged as two bytes per UTF-16 code unit of the JSON text.
pub fn estimate_size(value: &Value) -> u64 {
    match serde_json::to_string(value) {
        Ok(text) => 2 * text.encode_utf16().count() as u64,
        Err(_) => FALLBACK_ENTRY_SIZE,
    }
}
