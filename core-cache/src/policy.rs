//! # Cache Policies
//!
//! Policies decide how long an entry lives, how large it may be, and whether
//! it is written through to the persistent tier. Policies are attached to key
//! patterns; the first registered pattern matching a key wins and anything
//! unmatched falls back to the default policy.
//!
//! ```
//! use core_cache::policy::{CachePolicy, PolicyRegistry};
//!
//! let mut registry = PolicyRegistry::new(CachePolicy::default());
//! registry.register("user:*", CachePolicy::default().with_persistent(true));
//!
//! assert!(registry.resolve("user:42").persistent);
//! assert!(!registry.resolve("session:1").persistent);
//! ```

use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;

/// Order in which entries are chosen for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Least recently accessed first
    #[default]
    Lru,
    /// Oldest first
    Fifo,
    /// Least frequently accessed first
    Lfu,
    /// Soonest to expire first
    Ttl,
}

impl EvictionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Fifo => "fifo",
            Self::Lfu => "lfu",
            Self::Ttl => "ttl",
        }
    }
}

/// Per-pattern caching rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Default TTL applied when `set` is called without one
    pub ttl_seconds: Option<u64>,
    /// Largest single entry admitted under this policy
    pub max_size_bytes: u64,
    /// Advisory entry budget for keys under this policy
    pub max_entries: usize,
    pub eviction_strategy: EvictionStrategy,
    /// Write through to the persistent tier
    pub persistent: bool,
    /// Accepted for compatibility; values are stored uncompressed
    pub compression: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl_seconds: Some(3600),
            max_size_bytes: 1024 * 1024,
            max_entries: 1000,
            eviction_strategy: EvictionStrategy::Lru,
            persistent: false,
            compression: false,
        }
    }
}

impl CachePolicy {
    pub fn with_ttl_seconds(mut self, ttl: Option<u64>) -> Self {
        self.ttl_seconds = ttl;
        self
    }

    pub fn with_max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    pub fn with_eviction_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.eviction_strategy = strategy;
        self
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }
}

/// Glob over cache keys where `*` matches any run of characters.
///
/// Common shapes are `prefix:*`, `*:suffix`, an exact key, and `*` alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern {
    pattern: String,
}

impl KeyPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, key: &str) -> bool {
        if !self.pattern.contains('*') {
            return self.pattern == key;
        }

        let mut parts = self.pattern.split('*');
        let first = parts.next().unwrap_or_default();
        let Some(mut remaining) = key.strip_prefix(first) else {
            return false;
        };

        let rest: Vec<&str> = parts.collect();
        let Some((last, middle)) = rest.split_last() else {
            return true;
        };

        for part in middle.iter().filter(|part| !part.is_empty()) {
            match remaining.find(part) {
                Some(index) => remaining = &remaining[index + part.len()..],
                None => return false,
            }
        }

        remaining.ends_with(last)
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl From<&str> for KeyPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

/// Ordered list of (pattern, policy) pairs plus a fallback.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: Vec<(KeyPattern, CachePolicy)>,
    default_policy: CachePolicy,
}

impl PolicyRegistry {
    pub fn new(default_policy: CachePolicy) -> Self {
        Self {
            policies: Vec::new(),
            default_policy,
        }
    }

    /// Append a policy. Earlier registrations take precedence.
    pub fn register(&mut self, pattern: impl Into<KeyPattern>, policy: CachePolicy) {
        self.policies.push((pattern.into(), policy));
    }

    pub fn resolve(&self, key: &str) -> &CachePolicy {
        self.policies
            .iter()
            .find(|(pattern, _)| pattern.matches(key))
            .map(|(_, policy)| policy)
            .unwrap_or(&self.default_policy)
    }

    pub fn default_policy(&self) -> &CachePolicy {
        &self.default_policy
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

/// Decides whether a persistent-tier hit is copied into memory.
pub trait PromotionStrategy: Send + Sync {
    fn should_promote(&self, entry: &CacheEntry, policy: &CachePolicy) -> bool;
}

/// Promote every persistent hit.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPromote;

impl PromotionStrategy for AlwaysPromote {
    fn should_promote(&self, _entry: &CacheEntry, _policy: &CachePolicy) -> bool {
        true
    }
}

/// Promote only entries read at least `n` times from the persistent tier.
#[derive(Debug, Clone, Copy)]
pub struct MinAccessCount(pub u64);

impl PromotionStrategy for MinAccessCount {
    fn should_promote(&self, entry: &CacheEntry, _policy: &CachePolicy) -> bool {
        entry.access_count >= self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pattern_shapes() {
        assert!(KeyPattern::new("user:1").matches("user:1"));
        assert!(!KeyPattern::new("user:1").matches("user:10"));

        assert!(KeyPattern::new("user:*").matches("user:1"));
        assert!(KeyPattern::new("user:*").matches("user:"));
        assert!(!KeyPattern::new("user:*").matches("users:1"));

        assert!(KeyPattern::new("*:avatar").matches("user:1:avatar"));
        assert!(!KeyPattern::new("*:avatar").matches("user:1:avatar:small"));

        assert!(KeyPattern::new("*").matches(""));
        assert!(KeyPattern::new("*").matches("anything"));
    }

    #[test]
    fn test_pattern_inner_wildcards() {
        let pattern = KeyPattern::new("chat:*:messages");
        assert!(pattern.matches("chat:abc:messages"));
        assert!(!pattern.matches("chat:abc:members"));

        // Prefix and suffix must not overlap
        assert!(!KeyPattern::new("ab*ba").matches("aba"));
        assert!(KeyPattern::new("a*b*c").matches("a-b-c"));
        assert!(!KeyPattern::new("a*b*c").matches("a-c-b"));
    }

    #[test]
    fn test_first_match_wins() {
        let mut registry = PolicyRegistry::new(CachePolicy::default());
        registry.register("user:*", CachePolicy::default().with_ttl_seconds(Some(60)));
        registry.register("user:admin", CachePolicy::default().with_ttl_seconds(Some(5)));

        assert_eq!(registry.resolve("user:admin").ttl_seconds, Some(60));
        assert_eq!(registry.resolve("other").ttl_seconds, Some(3600));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_promotion_strategies() {
        let policy = CachePolicy::default();
        let mut entry = CacheEntry::new("k", json!(1), None, 0);

        assert!(AlwaysPromote.should_promote(&entry, &policy));
        assert!(!MinAccessCount(2).should_promote(&entry, &policy));

        entry.touch(1);
        entry.touch(2);
        assert!(MinAccessCount(2).should_promote(&entry, &policy));
    }
}
