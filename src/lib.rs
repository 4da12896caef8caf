//! A tiered key-value cache.
//!
//! Reads flow through three tiers:
//!
//! ```text
//! ┌──────────────┐   miss    ┌──────────────────┐   miss    ┌──────────────────┐
//! │ Memory Cache │ ────────▶ │ Protected Store   │ ────────▶ │  Mutable Store    │
//! │ (LRU + TTL)  │ ◀──fill── │ (read-only, opt.) │           │ (read/write, LRU) │
//! └──────────────┘           └──────────────────┘           └──────────────────┘
//! ```
//!
//! Writes land in the memory cache and the mutable store. The mutable store
//! is mirrored by an in-RAM [`disk_lru::DiskLruIndex`] that tracks per-key
//! size and expiry without holding the values themselves, and drives
//! eviction once the live size crosses a soft cap. A [`protected::ProtectedKeySet`]
//! names keys and key-prefixes that are immune to both eviction and removal.
//!
//! Everything is coordinated by [`engine::CacheEngine`], which is the type
//! most callers construct directly.
//!
//! # Example
//!
//! ```no_run
//! use tiered_cache::config::CacheSettings;
//! use tiered_cache::engine::CacheEngine;
//! use std::path::PathBuf;
//!
//! let settings = CacheSettings {
//!     disk_path_mutable: Some(PathBuf::from("/tmp/my-cache")),
//!     ..Default::default()
//! };
//! let engine = CacheEngine::new(settings);
//! engine.open().unwrap();
//! engine.put_bytes("weather:sfo", b"72F".to_vec(), 3600).unwrap();
//! assert_eq!(engine.get_bytes("weather:sfo").unwrap(), Some(b"72F".to_vec()));
//! ```
//!
//! # Modules
//!
//! - [`config`]: settings, eviction thresholds, reserved key constants
//! - [`error`]: the closed error type returned by fallible operations
//! - [`entry`]: the unified cache-entry type shared by the memory cache and disk index
//! - [`list`]: the intrusive doubly-linked list backing both LRU structures
//! - [`metrics`]: deterministic, `BTreeMap`-based metrics reporting
//! - [`memory`]: the front-tier memory cache (LRU + per-entry TTL)
//! - [`protected`]: the protected key/prefix set
//! - [`store`]: the backing-store trait and its RocksDB implementation
//! - [`disk_lru`]: the in-RAM index mirroring the mutable store's keys
//! - [`engine`]: the coordinator tying every component together

/// Unified cache entry type, shared by the memory cache and the disk LRU index.
pub mod entry;

/// Intrusive doubly linked list used by both LRU structures.
///
/// Internal infrastructure: exposes unsafe raw-pointer operations that
/// require careful invariant maintenance. Use [`memory`] or [`disk_lru`].
pub(crate) mod list;

/// Cache configuration: [`config::CacheSettings`] and reserved constants.
pub mod config;

/// The closed error type returned by fallible cache operations.
pub mod error;

/// Cache metrics system (deterministic `BTreeMap` reporting).
pub mod metrics;

/// The front-tier memory cache: bounded LRU with per-entry TTL.
pub mod memory;

/// The protected key/prefix set.
pub mod protected;

/// Backing-store abstraction and its RocksDB implementation.
pub mod store;

/// In-RAM LRU index mirroring the mutable store's keys.
pub mod disk_lru;

/// The cache engine: the coordinator tying every component together.
pub mod engine;

pub use config::CacheSettings;
pub use engine::CacheEngine;
pub use entry::CacheEntry;
pub use error::CacheError;
