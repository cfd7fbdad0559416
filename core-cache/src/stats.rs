//! Hit/miss accounting and the aggregated stats snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Point-in-time view across both tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_size_bytes: u64,
    pub memory_max_size_bytes: u64,
    pub persistent_entries: usize,
    pub persistent_size_bytes: u64,
    pub persistent_max_size_bytes: u64,
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub memory_hits: u64,
    pub persistent_hits: u64,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, zero before the first lookup
    pub hit_rate: f64,
    pub miss_rate: f64,
    /// Evictions across both tiers
    pub evictions: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn memory_usage_percentage(&self) -> f64 {
        percentage(self.memory_size_bytes, self.memory_max_size_bytes)
    }

    pub fn persistent_usage_percentage(&self) -> f64 {
        percentage(self.persistent_size_bytes, self.persistent_max_size_bytes)
    }
}

fn percentage(used: u64, max: u64) -> f64 {
    if max == 0 {
        return 0.0;
    }
    used as f64 / max as f64 * 100.0
}

/// Lock-free counters updated on the read path.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    memory_hits: AtomicU64,
    persistent_hits: AtomicU64,
    misses: AtomicU64,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
}

pub(crate) struct CounterSnapshot {
    pub memory_hits: u64,
    pub persistent_hits: u64,
    pub misses: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}

impl CounterSnapshot {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.persistent_hits
    }

    /// (hit rate, miss rate)
    pub fn rates(&self) -> (f64, f64) {
        let lookups = self.hits() + self.misses;
        if lookups == 0 {
            return (0.0, 0.0);
        }
        let hit_rate = self.hits() as f64 / lookups as f64;
        (hit_rate, 1.0 - hit_rate)
    }
}

impl Counters {
    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistent_hit(&self) {
        self.persistent_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_cleanup(&self, at: DateTime<Utc>) {
        if let Ok(mut last) = self.last_cleanup.lock() {
            *last = Some(at);
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            last_cleanup: self.last_cleanup.lock().map(|last| *last).unwrap_or(None),
        }
    }
}
