//! The protected key/prefix set.
//!
//! Keys (or key prefixes) added here are exempt from eviction and from
//! [`crate::engine::CacheEngine::remove`]. The set is ordered so that
//! prefix-containment queries ("is `key` covered by some shorter stored
//! prefix?") can be answered with a single `lower_bound`-style lookup,
//! mirroring the ordered-set design this module is adapted from.
//!
//! # Prefix semantics
//!
//! A stored entry `p` "covers" a key `k` if `k` starts with `p` (including
//! `k == p`). [`ProtectedKeySet::protect`] maintains the invariant that the
//! set never holds two entries where one is a proper prefix of the other —
//! the shorter entry always wins and redundant longer entries are dropped.

use std::collections::BTreeSet;

/// An ordered set of keys/prefixes immune to eviction and removal.
#[derive(Debug, Default)]
pub struct ProtectedKeySet {
    entries: BTreeSet<String>,
    dirty: bool,
    size_written: u64,
}

impl ProtectedKeySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        ProtectedKeySet::default()
    }

    /// Returns the number of entries (exact keys or prefixes) stored.
    pub fn count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Returns the byte length of the last serialized form.
    pub fn size(&self) -> u64 {
        self.size_written
    }

    /// Returns true if the set has changed since the last (de)serialization.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns true if `key` is covered by some stored entry.
    pub fn is_protected(&self, key: &str) -> bool {
        match self.entries.range(key.to_string()..).next() {
            Some(hit) if key.len() >= hit.len() => is_equal_or_prefix(hit, key),
            _ => false,
        }
    }

    /// Protects every key in `keys`, calling `on_newly_protected` once for
    /// each entry that was actually inserted (not already covered).
    ///
    /// Returns true if the set changed.
    pub fn protect<I, F>(&mut self, keys: I, mut on_newly_protected: F) -> bool
    where
        I: IntoIterator<Item = String>,
        F: FnMut(&str),
    {
        let mut changed = false;
        for key in keys {
            if let Some(hint) = self.entries.range(key.clone()..).next() {
                if is_prefix(hint, &key) {
                    continue;
                }
            }
            // Drop every stored entry that `key` is itself a prefix of —
            // they become redundant once the shorter `key` is protected.
            let redundant: Vec<String> = self
                .entries
                .range(key.clone()..)
                .take_while(|e| is_prefix(&key, e))
                .cloned()
                .collect();
            for r in redundant {
                self.entries.remove(&r);
            }
            if self.entries.insert(key.clone()) {
                self.dirty = true;
                changed = true;
                on_newly_protected(&key);
            }
        }
        changed
    }

    /// Releases every key in `keys`, calling `on_released` once per entry
    /// actually removed from the set.
    ///
    /// If the first entry `>= key` is a strict prefix of `key`, releasing
    /// that key fails outright (a protected prefix cannot be partially
    /// un-protected) and no change is made for that key; prior successful
    /// releases in the same call are kept.
    ///
    /// Returns true if anything changed.
    pub fn release<I, F>(&mut self, keys: I, mut on_released: F) -> bool
    where
        I: IntoIterator<Item = String>,
        F: FnMut(&str),
    {
        let mut changed = false;
        for key in keys {
            if let Some(hint) = self.entries.range(key.clone()..).next() {
                if is_prefix(hint, &key) {
                    continue;
                }
            }
            let doomed: Vec<String> = self
                .entries
                .range(key.clone()..)
                .take_while(|e| is_equal_or_prefix(&key, e))
                .cloned()
                .collect();
            for d in doomed {
                self.entries.remove(&d);
                self.dirty = true;
                changed = true;
                on_released(&d);
            }
        }
        changed
    }

    /// Serializes the set as NUL-terminated entries, concatenated in order.
    pub fn serialize(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for key in &self.entries {
            out.extend_from_slice(key.as_bytes());
            out.push(0);
        }
        self.dirty = false;
        self.size_written = out.len() as u64;
        out
    }

    /// Replaces the set's contents by parsing NUL-terminated entries.
    pub fn deserialize(&mut self, bytes: &[u8]) {
        self.entries.clear();
        for chunk in bytes.split(|&b| b == 0) {
            if !chunk.is_empty() {
                if let Ok(s) = std::str::from_utf8(chunk) {
                    self.entries.insert(s.to_string());
                }
            }
        }
        self.dirty = false;
        self.size_written = bytes.len() as u64;
    }
}

/// True if `prefix` is a strict, shorter prefix of `key`.
fn is_prefix(prefix: &str, key: &str) -> bool {
    key.len() > prefix.len() && key.starts_with(prefix)
}

/// True if `prefix` equals `key` or is a (possibly equal-length) prefix of it.
fn is_equal_or_prefix(prefix: &str, key: &str) -> bool {
    key.len() >= prefix.len() && key.starts_with(prefix)
}
