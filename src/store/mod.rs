//! Backing-store abstraction.
//!
//! [`BackingStore`] is the narrow trait the cache engine drives; [`rocks`]
//! provides the one production implementation, over the `rocksdb` crate.
//! The trait boundary exists so the embedded key-value engine stays an
//! implementation detail: open/close, point reads/writes, prefix scans,
//! atomic batches, blocking compaction, and an approximate size.

pub mod rocks;

use crate::error::StoreError;
use std::path::Path;

/// Outcome of [`BackingStore::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Opened cleanly.
    Success,
    /// Detected corruption (or, for a read-only mutable store, an unfinished
    /// compaction) and no repair was attempted or possible.
    Corrupted,
    /// Corruption was detected and repaired in place.
    Repaired,
}

/// A single put or delete queued for atomic application.
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Insert or overwrite `key` with `value`.
    Put {
        /// Record key.
        key: String,
        /// Record value.
        value: Vec<u8>,
    },
    /// Remove `key`, if present.
    Delete {
        /// Record key.
        key: String,
    },
}

/// A group of operations applied atomically by [`BackingStore::apply_batch`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        WriteBatch::default()
    }

    /// Queues a put.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Returns true if the batch has no queued operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterates over the queued operations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &BatchOp> {
        self.ops.iter()
    }
}

/// A uniform interface over an embedded, single-process key-value store.
///
/// Implementors own their own handle lifecycle: `open` re-opens a closed
/// store, and a store that fails to open (rather than merely being
/// corrupted) surfaces that as `Err`.
pub trait BackingStore: std::fmt::Debug + Send {
    /// Opens (or re-opens) the store at `path`.
    fn open(&mut self, path: &Path, read_only: bool, check_crc: bool) -> Result<OpenOutcome, StoreError>;

    /// Closes the store, releasing its handle. A no-op if already closed.
    fn close(&mut self);

    /// Reads the value for `key`, if present.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Returns true if `key` is present.
    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Writes `value` under `key`.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Removes `key`. Returns the number of bytes the removed record
    /// occupied (`key.len() + value.len()`), or 0 if it was absent.
    fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// Deletes every key under `prefix` for which `keep(key)` returns false.
    /// Returns the number of bytes reclaimed.
    fn delete_prefix(&self, prefix: &str, keep: &dyn Fn(&str) -> bool) -> Result<u64, StoreError>;

    /// Applies every operation in `batch` atomically.
    fn apply_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;

    /// Iterates every `(key, value)` pair whose key starts with `prefix`.
    fn scan_prefix(
        &self,
        prefix: &str,
    ) -> Result<Box<dyn Iterator<Item = (String, Vec<u8>)> + '_>, StoreError>;

    /// Runs a blocking full-range compaction.
    fn compact(&self) -> Result<(), StoreError>;

    /// Returns an approximate byte size of the whole keyspace.
    fn approximate_size(&self) -> Result<u64, StoreError>;

    /// Removes the store's on-disk directory entirely.
    fn destroy(&mut self, path: &Path) -> Result<(), StoreError>;
}
