//! The cache's closed error type.
//!
//! Transient backing-store errors encountered on a read (`get`/`contains`)
//! are downgraded to "absent" at the call site rather than surfaced here —
//! see the engine's read paths. `CacheError` is reserved for failures a
//! caller must react to: a store that won't open, a write that didn't
//! apply, or an operation attempted before `open()`.

use std::path::PathBuf;

/// Errors produced by [`crate::engine::CacheEngine`] and [`crate::store`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An operation was attempted before the engine (or the named tier) was opened.
    #[error("cache is not ready: {0}")]
    NotReady(&'static str),

    /// The configured disk path could not be opened and was not recoverable.
    #[error("failed to open disk path {path}: {source}")]
    OpenDiskPathFailure {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// The protected store was corrupted (or had an unfinished compaction when
    /// opened read-only) and repair was not possible or not permitted.
    #[error("protected cache at {0} is corrupted")]
    ProtectedCacheCorrupted(PathBuf),

    /// A batch write or other store operation failed.
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),

    /// Filesystem I/O failure (directory creation/removal, permissions).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a [`crate::store::BackingStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be opened at all (not even as corrupted).
    #[error("open failed: {0}")]
    OpenFailed(String),

    /// The store reported internal corruption.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A key lookup, write, or scan failed.
    #[error("operation failed: {0}")]
    Operation(String),

    /// Attempted to write to a store opened read-only.
    #[error("store is read-only")]
    ReadOnly,
}

/// Convenience alias for fallible engine operations.
pub type Result<T> = std::result::Result<T, CacheError>;
