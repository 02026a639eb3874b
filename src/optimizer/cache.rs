//! TTL + capacity bounded result cache.
//!
//! Values are JSON documents, sanitized before storage so that large numeric
//! arrays never sit in the cache verbatim. Expiry is checked lazily on lookup;
//! on overflow the entry with the oldest insertion timestamp is evicted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::export::sanitize_value;
use crate::stats::now_secs;

/// A cached value and when it was inserted (epoch seconds).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub inserted_at: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    entries: HashMap<String, CacheEntry>,
    ttl_secs: f64,
    capacity: usize,
    array_threshold: usize,
    stats: CacheStats,
}

/// Replace numeric arrays above `threshold` elements by summaries.
pub fn sanitize_for_cache(value: &Value, threshold: usize) -> Value {
    sanitize_value(value, threshold)
}

impl ResultCache {
    pub fn new(ttl_secs: f64, capacity: usize, array_threshold: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl_secs,
            capacity: capacity.max(1),
            array_threshold: array_threshold.max(1),
            stats: CacheStats::default(),
        }
    }

    pub fn ttl_secs(&self) -> f64 {
        self.ttl_secs
    }

    pub fn set_ttl_secs(&mut self, ttl_secs: f64) {
        self.ttl_secs = ttl_secs;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn is_expired(&self, entry: &CacheEntry, now: f64) -> bool {
        // A corrupt timestamp can never prove freshness.
        !entry.inserted_at.is_finite() || now - entry.inserted_at > self.ttl_secs
    }

    pub fn insert(&mut self, key: impl Into<String>, value: &Value) {
        self.insert_at(key, value, now_secs());
    }

    /// Store `value` under `key`, evicting the oldest entry when full.
    pub fn insert_at(&mut self, key: impl Into<String>, value: &Value, now: f64) {
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value: sanitize_for_cache(value, self.array_threshold),
                inserted_at: now,
            },
        );
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.is_finite())
            .min_by(|a, b| a.1.inserted_at.total_cmp(&b.1.inserted_at))
            .map(|(k, _)| k.clone());
        // Fall back to any entry when no timestamp is usable.
        let victim = oldest.or_else(|| self.entries.keys().next().cloned());
        if let Some(key) = victim {
            self.entries.remove(&key);
            self.stats.evictions += 1;
            tracing::debug!(key = %key, "evicted cache entry");
        }
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.get_at(key, now_secs())
    }

    /// Look up `key`, dropping it if expired. Counts a hit or a miss.
    pub fn get_at(&mut self, key: &str, now: f64) -> Option<Value> {
        if self.contains_at(key, now) {
            self.stats.hits += 1;
            self.entries.get(key).map(|e| e.value.clone())
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Whether a live entry exists. Expired entries are removed.
    pub fn contains_at(&mut self, key: &str, now: f64) -> bool {
        let expired = match self.entries.get(key) {
            Some(entry) => self.is_expired(entry, now),
            None => return false,
        };
        if expired {
            self.entries.remove(key);
            self.stats.expirations += 1;
            tracing::debug!(key, "cache entry expired");
            return false;
        }
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired_at(&mut self, now: f64) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl_secs;
        self.entries
            .retain(|_, e| e.inserted_at.is_finite() && now - e.inserted_at <= ttl);
        let removed = before - self.entries.len();
        self.stats.expirations += removed as u64;
        removed
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.stats = CacheStats::default();
    }
}
