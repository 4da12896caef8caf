//! The front-tier memory cache.
//!
//! A size-bounded LRU, built from the same [`crate::list::List`] +
//! `HashMap` pairing as [`crate::disk_lru::DiskLruIndex`], extended with a
//! per-entry absolute expiry. A secondary `BTreeMap<i64, Vec<String>>`
//! indexes keys by expiry so that expired entries can be purged in
//! ascending-expiry order before every read or write, without scanning
//! the whole cache.
//!
//! Values are either an opaque byte blob or a type-erased decoded object,
//! mirroring the two call paths [`crate::engine::CacheEngine`] exposes
//! (`put_bytes`/`get_bytes` and `put_encoded`/`get_encoded`).

use crate::config::NEVER_EXPIRES;
use crate::entry::CacheEntry;
use crate::list::{List, ListEntry};
use crate::metrics::{CacheMetrics, MemoryCacheMetrics};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// A cached value: either raw bytes or a decoded, type-erased object.
#[derive(Clone)]
pub enum CachedValue {
    /// The persistent, on-disk representation.
    Raw(Vec<u8>),
    /// A decoded in-memory object shared by reference.
    Decoded(Arc<dyn Any + Send + Sync>),
}

impl std::fmt::Debug for CachedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CachedValue::Raw(bytes) => write!(f, "Raw({} bytes)", bytes.len()),
            CachedValue::Decoded(_) => write!(f, "Decoded(..)"),
        }
    }
}

impl CachedValue {
    /// Returns the raw bytes, if this value holds them.
    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            CachedValue::Raw(bytes) => Some(bytes),
            CachedValue::Decoded(_) => None,
        }
    }
}

/// A memory cache entry's value: the cached payload plus its absolute expiry.
#[derive(Clone, Debug)]
struct MemoryValue {
    value: CachedValue,
    expiry: i64,
}

/// The bounded in-memory LRU cache with per-entry TTL.
pub struct MemoryCache {
    list: List<CacheEntry<String, MemoryValue>>,
    map: HashMap<String, *mut ListEntry<CacheEntry<String, MemoryValue>>>,
    expiry_index: BTreeMap<i64, Vec<String>>,
    metrics: MemoryCacheMetrics,
    current_size: u64,
    max_size: u64,
}

// SAFETY: MemoryCache owns all data; raw pointers in `map` only ever point to
// nodes owned by `list`. Mutation requires `&mut self`.
unsafe impl Send for MemoryCache {}
unsafe impl Sync for MemoryCache {}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("len", &self.map.len())
            .field("current_size", &self.current_size)
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl MemoryCache {
    /// Creates a cache bounded by `max_size` bytes of content.
    ///
    /// Entry count is not independently capped: eviction is driven purely by
    /// `max_size`, so the backing list is constructed with an effectively
    /// unbounded node capacity.
    pub fn new(max_size: u64) -> Self {
        MemoryCache {
            list: List::new(NonZeroUsize::new(usize::MAX).unwrap()),
            map: HashMap::new(),
            expiry_index: BTreeMap::new(),
            metrics: MemoryCacheMetrics::new(max_size),
            current_size: 0,
            max_size,
        }
    }

    /// Returns the number of entries currently cached.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the current total content size.
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// Returns the metrics collected for this cache.
    pub fn metrics(&self) -> &MemoryCacheMetrics {
        &self.metrics
    }

    /// Removes every entry whose expiry is `<= now`, in ascending-expiry order.
    pub fn purge_expired(&mut self, now: i64) {
        let expired_buckets: Vec<i64> = self
            .expiry_index
            .range(..=now)
            .map(|(&expiry, _)| expiry)
            .collect();
        for expiry in expired_buckets {
            if let Some(keys) = self.expiry_index.remove(&expiry) {
                for key in keys {
                    self.remove_entry(&key);
                    self.metrics.record_expiration();
                }
            }
        }
    }

    /// Looks up `key`, promoting it to most-recently-used on a hit.
    ///
    /// Does not itself purge expired entries; callers call [`Self::purge_expired`]
    /// first so a hit here is known-live.
    pub fn get(&mut self, key: &str) -> Option<&CachedValue> {
        if let Some(&node) = self.map.get(key) {
            unsafe {
                self.list.move_to_front(node);
                let entry = (*node).get_value_mut();
                entry.touch();
                self.metrics.core.record_hit(entry.size);
                Some(&entry.value.value)
            }
        } else {
            None
        }
    }

    /// Returns true if `key` is present and unexpired, without promoting it
    /// or removing an expired entry. Used where a lookup must not mutate
    /// recency (e.g. a plain existence check).
    pub fn contains_live(&self, key: &str, now: i64) -> bool {
        match self.map.get(key) {
            Some(&node) => unsafe {
                let expiry = (*node).get_value().value.expiry;
                expiry == NEVER_EXPIRES || expiry > now
            },
            None => false,
        }
    }

    /// Inserts `key` with absolute `expiry` (use [`NEVER_EXPIRES`] for none).
    ///
    /// `cost` is the byte size charged against `max_size`. Evicts
    /// least-recently-used entries (after their expiry bucket is cleaned up)
    /// until the new entry fits.
    pub fn put(&mut self, key: String, value: CachedValue, expiry: i64, cost: u64) {
        if let Some(&node) = self.map.get(&key) {
            unsafe {
                self.list.move_to_front(node);
                let entry = (*node).get_value_mut();
                self.unindex_expiry(&key, entry.value.expiry);
                self.current_size = self.current_size.saturating_sub(entry.size);
                entry.value = MemoryValue { value, expiry };
                entry.size = cost;
                entry.touch();
                self.current_size += cost;
                self.metrics.core.record_insertion(cost);
            }
            self.index_expiry(key, expiry);
            return;
        }

        while !self.map.is_empty() && self.current_size + cost > self.max_size {
            if let Some(old) = self.list.remove_last() {
                unsafe {
                    let ptr = Box::into_raw(old);
                    let cache_entry = (*ptr).get_value();
                    self.map.remove(&cache_entry.key);
                    self.unindex_expiry(&cache_entry.key, cache_entry.value.expiry);
                    self.current_size = self.current_size.saturating_sub(cache_entry.size);
                    self.metrics.core.record_eviction(cache_entry.size);
                    let _ = Box::from_raw(ptr);
                }
            } else {
                break;
            }
        }

        let entry = CacheEntry::new(key.clone(), MemoryValue { value, expiry }, cost);
        let node = self.list.add_unchecked(entry);
        self.map.insert(key.clone(), node);
        self.current_size += cost;
        self.metrics.core.record_insertion(cost);
        self.index_expiry(key, expiry);
    }

    /// Removes `key` unconditionally, returning true if it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    /// Removes every entry whose key starts with `prefix`, except those for
    /// which `keep` returns true.
    ///
    /// Scans the memory cache's own keyspace independently of any backing
    /// store: an entry can be present here (backfilled from a protected-store
    /// hit, say) without ever having been written to the mutable store.
    pub fn remove_prefix(&mut self, prefix: &str, keep: &dyn Fn(&str) -> bool) {
        let matching: Vec<String> = self
            .map
            .keys()
            .filter(|k| k.starts_with(prefix) && !keep(k))
            .cloned()
            .collect();
        for key in matching {
            self.remove_entry(&key);
        }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.current_size = 0;
        self.map.clear();
        self.list.clear();
        self.expiry_index.clear();
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        let Some(node) = self.map.remove(key) else {
            return false;
        };
        unsafe {
            let entry = (*node).get_value();
            let size = entry.size;
            let expiry = entry.value.expiry;
            self.list.remove(node);
            self.current_size = self.current_size.saturating_sub(size);
            self.unindex_expiry(key, expiry);
        }
        true
    }

    fn index_expiry(&mut self, key: String, expiry: i64) {
        if expiry != NEVER_EXPIRES {
            self.expiry_index.entry(expiry).or_default().push(key);
        }
    }

    fn unindex_expiry(&mut self, key: &str, expiry: i64) {
        if expiry == NEVER_EXPIRES {
            return;
        }
        if let Some(keys) = self.expiry_index.get_mut(&expiry) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.expiry_index.remove(&expiry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bytes: &[u8]) -> CachedValue {
        CachedValue::Raw(bytes.to_vec())
    }

    #[test]
    fn put_and_get_round_trip() {
        let mut cache = MemoryCache::new(1024);
        cache.put("a".to_string(), raw(b"1"), NEVER_EXPIRES, 1);
        assert_eq!(cache.get("a").unwrap().as_raw(), Some(b"1".as_slice()));
    }

    #[test]
    fn expired_entries_are_purged() {
        let mut cache = MemoryCache::new(1024);
        cache.put("a".to_string(), raw(b"1"), 100, 1);
        cache.purge_expired(50);
        assert!(cache.get("a").is_some());
        cache.purge_expired(150);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn eviction_respects_size_cap() {
        let mut cache = MemoryCache::new(2);
        cache.put("a".to_string(), raw(b"1"), NEVER_EXPIRES, 1);
        cache.put("b".to_string(), raw(b"2"), NEVER_EXPIRES, 1);
        cache.put("c".to_string(), raw(b"3"), NEVER_EXPIRES, 1);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.current_size(), 2);
    }

    #[test]
    fn remove_clears_expiry_index() {
        let mut cache = MemoryCache::new(1024);
        cache.put("a".to_string(), raw(b"1"), 100, 1);
        assert!(cache.remove("a"));
        cache.purge_expired(200);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn remove_prefix_honors_keep_predicate() {
        let mut cache = MemoryCache::new(1024);
        cache.put("p:1".to_string(), raw(b"1"), NEVER_EXPIRES, 1);
        cache.put("p:2".to_string(), raw(b"2"), NEVER_EXPIRES, 1);
        cache.put("q:1".to_string(), raw(b"3"), NEVER_EXPIRES, 1);
        cache.remove_prefix("p:", &|k| k == "p:1");
        assert!(cache.get("p:1").is_some());
        assert!(cache.get("p:2").is_none());
        assert!(cache.get("q:1").is_some());
    }

    #[test]
    fn contains_live_does_not_promote_or_remove() {
        let mut cache = MemoryCache::new(1024);
        cache.put("a".to_string(), raw(b"1"), 100, 1);
        assert!(cache.contains_live("a", 50));
        assert!(!cache.contains_live("a", 150));
        // still present: contains_live never evicts the expired entry itself
        assert!(cache.map.contains_key("a"));
    }

    #[test]
    fn clear_resets_everything() {
        let mut cache = MemoryCache::new(1024);
        cache.put("a".to_string(), raw(b"1"), 100, 1);
        cache.put("b".to_string(), raw(b"2"), NEVER_EXPIRES, 1);
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.current_size(), 0);
    }
}
