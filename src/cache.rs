//! # Query Cache Module
//!
//! ## Purpose
//! Memoizes fully materialized result sets keyed by a stable hash of the
//! normalized query plan. Entries are valid only while the index generation
//! they were computed against is still current and their TTL has not lapsed;
//! publication of any new generation implicitly invalidates every prior
//! entry through a cheap version comparison on read (lazy invalidation).
//!
//! ## Input/Output Specification
//! - **Input**: Normalized query plans, materialized results, the current
//!   generation version
//! - **Output**: Cached results on hit; `None` (a plain miss, not an error)
//!   on absence, staleness, or expiry
//! - **Eviction**: Bounded LRU once the configured capacity is exceeded;
//!   lock-free reads with a short critical section on insert/evict

use crate::config::CacheConfig;
use crate::errors::Result;
use crate::Clock;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable FNV-1a hash over the canonical JSON encoding of a normalized
/// query plan
pub fn cache_key<T: Serialize>(value: &T) -> Result<u64> {
    let bytes = serde_json::to_vec(value)?;
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    Ok(hash)
}

struct CacheEntry<V> {
    value: V,
    generation_version: u64,
    expires_at: DateTime<Utc>,
    last_access: u64,
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Generation-versioned LRU cache for materialized search results
pub struct QueryCache<V> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: DashMap<u64, CacheEntry<V>>,
    /// Monotonic access counter backing LRU ordering
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: DashMap::new(),
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached result. Valid only while the stored generation
    /// version equals `current_version` and the entry is unexpired; invalid
    /// entries are dropped on the way out.
    pub fn get(&self, key: u64, current_version: u64) -> Option<V> {
        if !self.config.enabled {
            return None;
        }
        let now = self.clock.now();
        {
            let Some(mut entry) = self.entries.get_mut(&key) else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            };
            if entry.generation_version == current_version && now < entry.expires_at {
                entry.last_access = self.tick.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        // Stale generation or lapsed TTL; drop the entry lazily
        self.entries.remove(&key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a result computed against `generation_version`, evicting the
    /// least recently used entry when over capacity
    pub fn insert(&self, key: u64, value: V, generation_version: u64) {
        if !self.config.enabled {
            return;
        }
        if self.entries.len() >= self.config.capacity && !self.entries.contains_key(&key) {
            self.evict_lru();
        }
        let expires_at =
            self.clock.now() + chrono::Duration::seconds(self.config.ttl_seconds as i64);
        self.entries.insert(
            key,
            CacheEntry {
                value,
                generation_version,
                expires_at,
                last_access: self.tick.fetch_add(1, Ordering::Relaxed),
            },
        );
    }

    /// Drop expired entries; called by the maintenance sweep
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before - self.entries.len()
    }

    /// Remove everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn evict_lru(&self) {
        let mut oldest: Option<(u64, u64)> = None;
        for entry in self.entries.iter() {
            match oldest {
                Some((_, access)) if entry.last_access >= access => {}
                _ => oldest = Some((*entry.key(), entry.last_access)),
            }
        }
        if let Some((key, _)) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemClock;
    use parking_lot::Mutex;

    struct StepClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl StepClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Utc::now()),
            })
        }

        fn advance_secs(&self, secs: i64) {
            *self.now.lock() += chrono::Duration::seconds(secs);
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }

    fn cache(capacity: usize, clock: Arc<dyn Clock>) -> QueryCache<String> {
        QueryCache::new(
            CacheConfig {
                enabled: true,
                capacity,
                ttl_seconds: 60,
            },
            clock,
        )
    }

    #[test]
    fn test_hit_requires_matching_generation() {
        let cache = cache(8, Arc::new(SystemClock));
        cache.insert(1, "result".to_string(), 7);
        assert_eq!(cache.get(1, 7), Some("result".to_string()));
        // Any generation publication invalidates prior entries
        assert_eq!(cache.get(1, 8), None);
        // The stale entry was dropped on the failed read
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_ttl_expiry() {
        let clock = StepClock::new();
        let cache = cache(8, clock.clone());
        cache.insert(1, "result".to_string(), 1);
        assert!(cache.get(1, 1).is_some());
        clock.advance_secs(61);
        assert_eq!(cache.get(1, 1), None);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = cache(2, Arc::new(SystemClock));
        cache.insert(1, "a".to_string(), 1);
        cache.insert(2, "b".to_string(), 1);
        // Touch key 1 so key 2 becomes least recently used
        assert!(cache.get(1, 1).is_some());
        cache.insert(3, "c".to_string(), 1);
        assert_eq!(cache.stats().size, 2);
        assert!(cache.get(1, 1).is_some());
        assert!(cache.get(2, 1).is_none());
        assert!(cache.get(3, 1).is_some());
    }

    #[test]
    fn test_sweep_expired() {
        let clock = StepClock::new();
        let cache = cache(8, clock.clone());
        cache.insert(1, "a".to_string(), 1);
        cache.insert(2, "b".to_string(), 1);
        clock.advance_secs(61);
        assert_eq!(cache.sweep_expired(), 2);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let cache: QueryCache<String> = QueryCache::new(
            CacheConfig {
                enabled: false,
                capacity: 8,
                ttl_seconds: 60,
            },
            Arc::new(SystemClock),
        );
        cache.insert(1, "a".to_string(), 1);
        assert_eq!(cache.get(1, 1), None);
    }

    #[test]
    fn test_cache_key_stability() {
        #[derive(Serialize)]
        struct Sample {
            q: &'static str,
            page: usize,
        }
        let a = cache_key(&Sample { q: "合同", page: 1 }).unwrap();
        let b = cache_key(&Sample { q: "合同", page: 1 }).unwrap();
        let c = cache_key(&Sample { q: "合同", page: 2 }).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
