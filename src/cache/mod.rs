//! Concurrent fingerprint-keyed cache for remote judgments.
//!
//! Keys are case-folded, whitespace-trimmed, then SHA-256 hashed together
//! with the guard type, so two textually-equivalent prompts share one remote
//! judgment.  There is no background reaper: expiry is checked lazily on
//! read, and when capacity is hit the oldest 10% of entries (by creation
//! time) are evicted before the insert — O(N) amortized into writers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
// tokio's Instant so paused-clock tests can advance entry age.
use tokio::time::Instant;

/// Rough fixed cost per entry, on top of the value's own weight.
const PER_ENTRY_OVERHEAD_BYTES: usize = 128;

// ── GuardType ──────────────────────────────────────────────────────────

/// Which judgment flavor a cache entry belongs to.  Part of the key, so an
/// input judgment can never answer an output query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardType {
    /// Input (prompt) judgments.
    Input,
    /// Output (response) judgments.
    Output,
    /// Groundedness judgments.
    Groundedness,
}

impl std::fmt::Display for GuardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::Groundedness => write!(f, "groundedness"),
        }
    }
}

// ── CacheConfig / CacheStats ───────────────────────────────────────────

/// Tuning knobs for [`SemanticCache`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    /// Master switch — when `false`, writes are no-ops and reads miss.
    pub enabled: bool,
    /// Entry time-to-live.
    pub ttl: Duration,
    /// Maximum entry count before eviction kicks in.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            max_entries: 10_000,
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entry count.
    pub entries: usize,
    /// Total hits since construction.
    pub hits: u64,
    /// Total misses since construction.
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 when no reads happened.
    pub hit_rate: f64,
    /// Rough memory footprint estimate.
    pub estimated_bytes: usize,
}

// ── EntryWeight ────────────────────────────────────────────────────────

/// Size contribution of a cached value, for the stats estimate.
pub trait EntryWeight {
    /// Approximate heap bytes held by this value.
    fn weight_bytes(&self) -> usize;
}

// ── SemanticCache ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
}

/// Concurrent TTL cache keyed by (guard type, input fingerprint).
#[derive(Debug)]
pub struct SemanticCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone + EntryWeight> Default for SemanticCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<V: Clone + EntryWeight> SemanticCache<V> {
    /// Create a cache with the given configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// SHA-256 fingerprint of the case-folded, trimmed input plus the guard
    /// type.
    #[must_use]
    pub fn fingerprint(input: &str, guard_type: GuardType) -> String {
        let mut hasher = Sha256::new();
        hasher.update(guard_type.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(input.trim().to_lowercase().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a live entry.  Expired entries are removed on the spot and
    /// reported as misses.  Returns `None` without touching the counters
    /// when caching is disabled.
    #[must_use]
    pub fn try_get(&self, input: &str, guard_type: GuardType) -> Option<V> {
        if !self.config.enabled {
            return None;
        }

        let key = Self::fingerprint(input, guard_type);
        if let Some(entry) = self.entries.get(&key) {
            if entry.created_at.elapsed() <= self.config.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove(&key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value.  No-op when caching is disabled.
    pub fn set(&self, input: &str, guard_type: GuardType, value: V) {
        if !self.config.enabled {
            return;
        }

        if self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }

        let key = Self::fingerprint(input, guard_type);
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    /// Remove the oldest 10% of entries (at least one) by creation time.
    fn evict_oldest(&self) {
        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().created_at))
            .collect();
        by_age.sort_by_key(|(_, created_at)| *created_at);

        let to_remove = (by_age.len() / 10).max(1);
        for (key, _) in by_age.into_iter().take(to_remove) {
            self.entries.remove(&key);
        }
    }

    /// Drop every entry.  Counters are preserved.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Current statistics snapshot.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let reads = hits + misses;
        let estimated_bytes = self
            .entries
            .iter()
            .map(|e| PER_ENTRY_OVERHEAD_BYTES + e.value().value.weight_bytes())
            .sum();
        let hit_rate = if reads == 0 {
            0.0
        } else {
            hits as f64 / reads as f64
        };

        CacheStats {
            entries: self.entries.len(),
            hits,
            misses,
            hit_rate,
            estimated_bytes,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    impl EntryWeight for String {
        fn weight_bytes(&self) -> usize {
            self.len()
        }
    }

    fn cache(config: CacheConfig) -> SemanticCache<String> {
        SemanticCache::new(config)
    }

    #[test]
    fn set_then_get_round_trips() {
        let c = cache(CacheConfig::default());
        c.set("Hello", GuardType::Input, "verdict".to_string());
        assert_eq!(
            c.try_get("Hello", GuardType::Input).as_deref(),
            Some("verdict")
        );
    }

    #[test]
    fn keys_are_case_folded_and_trimmed() {
        let c = cache(CacheConfig::default());
        c.set("  Hello World  ", GuardType::Input, "v".to_string());
        assert!(c.try_get("hello world", GuardType::Input).is_some());
    }

    #[test]
    fn guard_type_partitions_keys() {
        let c = cache(CacheConfig::default());
        c.set("same text", GuardType::Input, "v".to_string());
        assert!(c.try_get("same text", GuardType::Output).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_is_lazy_and_counts_as_miss() {
        let c = cache(CacheConfig {
            ttl: Duration::from_secs(10),
            ..CacheConfig::default()
        });
        c.set("k", GuardType::Input, "v".to_string());
        assert!(c.try_get("k", GuardType::Input).is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(c.try_get("k", GuardType::Input).is_none());
        assert_eq!(c.stats().entries, 0, "expired entry removed on read");
    }

    #[test]
    fn disabled_cache_never_stores() {
        let c = cache(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        c.set("k", GuardType::Input, "v".to_string());
        assert!(c.try_get("k", GuardType::Input).is_none());
        let stats = c.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits + stats.misses, 0, "disabled reads do not count");
    }

    #[test]
    fn eviction_removes_oldest_tenth() {
        let c = cache(CacheConfig {
            max_entries: 10,
            ..CacheConfig::default()
        });
        for i in 0..10 {
            c.set(&format!("key-{i}"), GuardType::Input, "v".to_string());
        }
        assert_eq!(c.stats().entries, 10);

        c.set("key-10", GuardType::Input, "v".to_string());
        assert_eq!(c.stats().entries, 10, "one evicted, one inserted");
        assert!(c.try_get("key-10", GuardType::Input).is_some());
    }

    #[test]
    fn hit_rate_is_exact() {
        let c = cache(CacheConfig::default());
        c.set("k", GuardType::Input, "v".to_string());
        let _ = c.try_get("k", GuardType::Input); // hit
        let _ = c.try_get("k", GuardType::Input); // hit
        let _ = c.try_get("missing", GuardType::Input); // miss

        let stats = c.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clear_preserves_counters() {
        let c = cache(CacheConfig::default());
        c.set("k", GuardType::Input, "v".to_string());
        let _ = c.try_get("k", GuardType::Input);
        c.clear();
        assert_eq!(c.stats().entries, 0);
        assert_eq!(c.stats().hits, 1);
    }

    #[test]
    fn estimated_bytes_grows_with_payload() {
        let c = cache(CacheConfig::default());
        c.set("a", GuardType::Input, "x".repeat(1000));
        assert!(c.stats().estimated_bytes >= 1000);
    }
}
