//! Memory cache metrics
//!
//! Metrics for the front-tier memory cache: the core hit/miss/eviction
//! counters plus an expiration counter for entries purged by TTL rather
//! than evicted for space.

use super::{CacheMetrics, CoreCacheMetrics};
use std::collections::BTreeMap;

/// Metrics for the in-process memory cache.
#[derive(Debug, Clone)]
pub struct MemoryCacheMetrics {
    /// Core metrics common to all cache tiers.
    pub core: CoreCacheMetrics,
    /// Number of entries purged for having passed their expiry.
    pub expirations: u64,
}

impl MemoryCacheMetrics {
    /// Creates a new instance bounded by `max_cache_size_bytes`.
    pub fn new(max_cache_size_bytes: u64) -> Self {
        MemoryCacheMetrics {
            core: CoreCacheMetrics::new(max_cache_size_bytes),
            expirations: 0,
        }
    }

    /// Records an entry being purged due to expiry (as opposed to LRU eviction).
    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    /// Converts to a `BTreeMap` for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.core.to_btreemap();
        metrics.insert("expirations".to_string(), self.expirations as f64);
        metrics
    }
}

impl CacheMetrics for MemoryCacheMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "MemoryLRU"
    }
}
