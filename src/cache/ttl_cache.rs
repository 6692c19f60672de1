//! TTL cache with per-entry expiry
//!
//! Entries are served only while fresh. An expired entry is evicted by the
//! read that finds it, or by [`TtlCache::purge_expired`] during the periodic
//! cleanup pass.

use crate::clock::Clock;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A cached value and the instant (epoch ms) after which it is stale
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at_ms: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate (0.0-1.0). Returns 0.0 if no lookups yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Key/value store with per-entry expiry and a hard entry ceiling
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fresh value for `key`, or `None` on miss. An expired entry is evicted.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Cache HIT");
                return Some(entry.value.clone());
            }
        }

        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, "Cache MISS");
        None
    }

    /// Insert or replace `key`, fresh for `ttl` from now
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let expires_at_ms = self.clock.now_ms().saturating_add(ttl.as_millis() as u64);

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.make_room();
        }

        debug!(key = %key, ttl_ms = ttl.as_millis(), "Cache SET");
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at_ms,
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry whose key starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(prefix = prefix, removed = removed, "Cache DEL prefix");
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Purge stale entries; if still full, evict the entry closest to expiry
    fn make_room(&self) {
        if self.purge_expired() > 0 && self.entries.len() < self.max_entries {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at_ms)
            .map(|entry| entry.key().clone());

        if let Some(victim) = victim {
            self.entries.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %victim, "Cache capacity eviction");
        }
    }
}
