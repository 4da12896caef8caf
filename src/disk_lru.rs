//! In-RAM LRU index mirroring the mutable store's keys.
//!
//! Every key physically present in the mutable store (other than an expiry
//! companion record, the protected-set record, or a protected key) has a
//! corresponding entry here, carrying its payload size and absolute expiry.
//! The index drives eviction decisions; it never holds the values
//! themselves, so its own memory footprint is independent of
//! `max_disk_storage`.
//!
//! Built from the same [`crate::list::List`] + `HashMap` pairing as
//! [`crate::memory::MemoryCache`], but with an effectively unbounded entry
//! count — only accumulated byte cost (tracked by the engine, not here)
//! bounds the mutable store.

use crate::entry::CacheEntry;
use crate::list::{List, ListEntry};
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// Per-key metadata tracked by the disk LRU index.
#[derive(Clone, Copy, Debug)]
pub struct DiskEntryMeta {
    /// Payload size in bytes (key + value), or 0 until known.
    pub size: u64,
    /// Absolute expiry (seconds since epoch), or [`crate::config::NEVER_EXPIRES`].
    pub expiry: i64,
}

impl Default for DiskEntryMeta {
    fn default() -> Self {
        DiskEntryMeta {
            size: 0,
            expiry: crate::config::NEVER_EXPIRES,
        }
    }
}

/// The in-RAM LRU index over the mutable store's keyspace.
pub struct DiskLruIndex {
    list: List<CacheEntry<String, DiskEntryMeta>>,
    map: HashMap<String, *mut ListEntry<CacheEntry<String, DiskEntryMeta>>>,
}

// SAFETY: DiskLruIndex owns all data; raw pointers in `map` only ever point
// to nodes owned by `list`. Mutation requires `&mut self`.
unsafe impl Send for DiskLruIndex {}
unsafe impl Sync for DiskLruIndex {}

impl std::fmt::Debug for DiskLruIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskLruIndex")
            .field("len", &self.map.len())
            .finish()
    }
}

impl Default for DiskLruIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskLruIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        DiskLruIndex {
            list: List::new(NonZeroUsize::new(usize::MAX).unwrap()),
            map: HashMap::new(),
        }
    }

    /// Returns the number of indexed keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no keys are indexed.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns true if `key` is indexed.
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Returns the metadata for `key`, without changing its recency.
    pub fn peek(&self, key: &str) -> Option<DiskEntryMeta> {
        let node = *self.map.get(key)?;
        unsafe { Some((*node).get_value().value) }
    }

    /// Inserts `key` at the most-recently-used position, or updates it in
    /// place (promoting it) if already indexed. `meta` replaces any prior
    /// metadata wholesale.
    pub fn upsert(&mut self, key: &str, meta: DiskEntryMeta) {
        if let Some(&node) = self.map.get(key) {
            unsafe {
                self.list.move_to_front(node);
                (*node).get_value_mut().value = meta;
            }
            return;
        }
        let entry = CacheEntry::new(key.to_string(), meta, meta.size);
        let node = self.list.add_unchecked(entry);
        self.map.insert(key.to_string(), node);
    }

    /// Updates just the size field for `key`, inserting it if absent.
    pub fn set_size(&mut self, key: &str, size: u64) {
        let mut meta = self.peek(key).unwrap_or_default();
        meta.size = size;
        self.upsert(key, meta);
    }

    /// Updates just the expiry field for `key`, inserting it if absent.
    pub fn set_expiry(&mut self, key: &str, expiry: i64) {
        let mut meta = self.peek(key).unwrap_or_else(|| DiskEntryMeta {
            size: 0,
            expiry: crate::config::NEVER_EXPIRES,
        });
        meta.expiry = expiry;
        self.upsert(key, meta);
    }

    /// Promotes `key` to the most-recently-used position without changing
    /// its metadata. No-op if `key` is not indexed.
    pub fn promote(&mut self, key: &str) {
        if let Some(&node) = self.map.get(key) {
            unsafe {
                self.list.move_to_front(node);
            }
        }
    }

    /// Removes `key` from the index, returning its metadata if it was present.
    pub fn remove(&mut self, key: &str) -> Option<DiskEntryMeta> {
        let node = self.map.remove(key)?;
        unsafe {
            let meta = (*node).get_value().value;
            self.list.remove(node);
            Some(meta)
        }
    }

    /// Removes every key under `prefix`, calling `on_removed` for each.
    pub fn remove_prefix<F: FnMut(&str, DiskEntryMeta)>(&mut self, prefix: &str, mut on_removed: F) {
        let matching: Vec<String> = self
            .map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in matching {
            if let Some(meta) = self.remove(&key) {
                on_removed(&key, meta);
            }
        }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.map.clear();
        self.list.clear();
    }

    /// Returns `(key, meta)` for every indexed entry, most-recently-used first.
    pub fn entries_mru_first(&self) -> Vec<(String, DiskEntryMeta)> {
        self.list
            .node_pointers()
            .into_iter()
            .map(|node| unsafe {
                let entry = (*node).get_value();
                (entry.key.clone(), entry.value)
            })
            .collect()
    }

    /// Returns `(key, meta)` for every indexed entry, least-recently-used first.
    pub fn entries_lru_first(&self) -> Vec<(String, DiskEntryMeta)> {
        let mut entries = self.entries_mru_first();
        entries.reverse();
        entries
    }
}
