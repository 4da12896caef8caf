//! Unified Cache Entry Type
//!
//! This module provides a unified `CacheEntry<K, V, M>` structure shared by
//! the memory cache and the disk LRU index. The generic `M` parameter exists
//! so a future LRU variant could carry extra per-entry state without
//! changing this core structure; both current users instantiate it as `()`.
//!
//! # Design Philosophy
//!
//! The unified entry design provides several benefits:
//! - **Consistency**: the memory cache and disk index share one entry type
//! - **Extensibility**: optional metadata via the `M` generic parameter
//! - **Timestamps**: Built-in creation and last-accessed timestamps for TTL and monitoring
//! - **Size-awareness**: Explicit size field for byte-capacity accounting
//!
//! # Memory Layout
//!
//! Each entry has the following overhead:
//! - `key: K` - User's key type
//! - `value: V` - User's value type  
//! - `size: u64` - 8 bytes (content size tracking)
//! - `last_accessed: u64` - 8 bytes (timestamps for monitoring)
//! - `create_time: u64` - 8 bytes (timestamps for TTL)
//! - `metadata: Option<M>` - 0 bytes for the `()` both callers use
//!
//! Base overhead: ~24 bytes + key + value
//!
//! # Usage Examples
//!
//! ```ignore
//! use tiered_cache::entry::CacheEntry;
//!
//! // Simple entry with no metadata, as the memory cache and disk index use
//! let entry: CacheEntry<String, Vec<u8>, ()> = CacheEntry::new(
//!     "image.png".to_string(),
//!     vec![0u8; 1024],
//!     1024, // size in bytes
//! );
//! ```
//!
//! # Thread Safety
//!
//! The single-threaded cache implementations use plain `u64` for timestamps.
//! For concurrent access, wrap the cache in appropriate synchronization primitives,
//! or use the concurrent cache implementations which handle synchronization internally.

extern crate alloc;

use core::fmt;

/// Unified cache entry holding key, value, timestamps, and optional metadata.
///
/// The `M` parameter exists for a future LRU variant that needs extra
/// per-entry state; both the memory cache and disk LRU index use `()`.
///
/// # Design Decisions
///
/// - `size`: User-provided size of content this entry represents. Could be
///   memory bytes, disk bytes, or any unit. Use 1 for count-based caches.
/// - `last_accessed`: updated on every read, used to drive LRU promotion.
/// - `create_time`: set once at insertion; unused by either current caller
///   but kept for parity with `last_accessed`.
/// - `metadata`: `None` for both current callers, which use `M = ()`.
///
/// # Examples
///
/// ```
/// use tiered_cache::entry::CacheEntry;
///
/// // Create a simple entry for count-based caching
/// let entry: CacheEntry<&str, i32, ()> = CacheEntry::new("key", 42, 1);
/// assert_eq!(entry.key, "key");
/// assert_eq!(entry.value, 42);
/// assert_eq!(entry.size, 1);
/// ```
pub struct CacheEntry<K, V, M = ()> {
    /// The cached key
    pub key: K,

    /// The cached value (or reference/handle to external storage)
    pub value: V,

    /// Size of content this entry represents (user-provided).
    /// For count-based caches, use 1.
    /// For size-aware caches, use actual bytes (memory, disk, etc.)
    pub size: u64,

    /// Last access timestamp (nanos since epoch or monotonic clock).
    last_accessed: u64,

    /// Creation timestamp (nanos since epoch or monotonic clock).
    create_time: u64,

    /// Reserved for a future `M` other than `()`. Always `None` today.
    pub metadata: Option<M>,
}

impl<K, V, M> CacheEntry<K, V, M> {
    /// Creates a new cache entry without metadata.
    ///
    /// This is the constructor both the memory cache and the disk LRU
    /// index use.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key
    /// * `value` - The cached value
    /// * `size` - Size of the content this entry represents (use 1 for count-based caches)
    ///
    /// # Examples
    ///
    /// ```
    /// use tiered_cache::entry::CacheEntry;
    ///
    /// // Count-based cache entry
    /// let entry: CacheEntry<&str, String, ()> = CacheEntry::new("user:123", "Alice".to_string(), 1);
    ///
    /// // Size-aware cache entry
    /// let data = vec![0u8; 1024];
    /// let entry: CacheEntry<&str, Vec<u8>, ()> = CacheEntry::new("file.bin", data, 1024);
    /// ```
    #[inline]
    pub fn new(key: K, value: V, size: u64) -> Self {
        let now = Self::now_nanos();
        Self {
            key,
            value,
            size,
            last_accessed: now,
            create_time: now,
            metadata: None,
        }
    }

    /// Creates a new cache entry carrying metadata.
    ///
    /// Neither current caller uses this; kept for an `M` other than `()`.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key
    /// * `value` - The cached value
    /// * `size` - Size of the content this entry represents (use 1 for count-based caches)
    /// * `metadata` - Algorithm-specific metadata
    ///
    /// # Examples
    ///
    /// ```
    /// use tiered_cache::entry::CacheEntry;
    ///
    /// struct Frequency { count: u64 }
    ///
    /// let entry = CacheEntry::with_metadata(
    ///     "key".to_string(),
    ///     vec![1, 2, 3],
    ///     3,
    ///     Frequency { count: 0 },
    /// );
    /// assert!(entry.metadata.is_some());
    /// ```
    #[inline]
    pub fn with_metadata(key: K, value: V, size: u64, metadata: M) -> Self {
        let now = Self::now_nanos();
        Self {
            key,
            value,
            size,
            last_accessed: now,
            create_time: now,
            metadata: Some(metadata),
        }
    }

    /// Updates the last_accessed timestamp to the current time.
    ///
    /// # Examples
    ///
    /// ```
    /// use tiered_cache::entry::CacheEntry;
    ///
    /// let mut entry: CacheEntry<&str, i32, ()> = CacheEntry::new("key", 42, 1);
    /// let old_access_time = entry.last_accessed();
    ///
    /// // Simulate some time passing (in real code, time would actually pass)
    /// entry.touch();
    ///
    /// // On systems with std, the access time would be updated
    /// ```
    #[inline]
    pub fn touch(&mut self) {
        self.last_accessed = Self::now_nanos();
    }

    /// Gets the last_accessed timestamp in nanoseconds.
    ///
    /// Returns nanoseconds since UNIX epoch when the `std` feature is enabled,
    /// or 0 in `no_std` environments.
    #[inline]
    pub fn last_accessed(&self) -> u64 {
        self.last_accessed
    }

    /// Gets the creation timestamp in nanoseconds.
    ///
    /// Returns nanoseconds since UNIX epoch when the `std` feature is enabled,
    /// or 0 in `no_std` environments.
    #[inline]
    pub fn create_time(&self) -> u64 {
        self.create_time
    }

    /// Gets the age of this entry in nanoseconds.
    ///
    /// Age is calculated as `now - create_time`. Returns 0 in `no_std`
    /// environments where time is not available.
    ///
    /// # Examples
    ///
    /// ```
    /// use tiered_cache::entry::CacheEntry;
    ///
    /// let entry: CacheEntry<&str, i32, ()> = CacheEntry::new("key", 42, 1);
    /// let age = entry.age_nanos();
    /// // Age should be very small since we just created the entry
    /// ```
    #[inline]
    pub fn age_nanos(&self) -> u64 {
        Self::now_nanos().saturating_sub(self.create_time())
    }

    /// Gets the time since last access in nanoseconds.
    ///
    /// Idle time is calculated as `now - last_accessed`. Returns 0 in `no_std`
    /// environments where time is not available.
    ///
    /// # Examples
    ///
    /// ```
    /// use tiered_cache::entry::CacheEntry;
    ///
    /// let entry: CacheEntry<&str, i32, ()> = CacheEntry::new("key", 42, 1);
    /// let idle = entry.idle_nanos();
    /// // Idle time should be very small since we just created the entry
    /// ```
    #[inline]
    pub fn idle_nanos(&self) -> u64 {
        Self::now_nanos().saturating_sub(self.last_accessed())
    }

    /// Returns a mutable reference to the metadata.
    ///
    /// Returns `None` if the entry was created without metadata.
    #[inline]
    pub fn metadata_mut(&mut self) -> Option<&mut M> {
        self.metadata.as_mut()
    }

    /// Returns the current time in nanoseconds since the UNIX epoch.
    #[inline]
    fn now_nanos() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

impl<K: Clone, V: Clone, M: Clone> Clone for CacheEntry<K, V, M> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            size: self.size,
            last_accessed: self.last_accessed,
            create_time: self.create_time,
            metadata: self.metadata.clone(),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, M: fmt::Debug> fmt::Debug for CacheEntry<K, V, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("size", &self.size)
            .field("last_accessed", &self.last_accessed)
            .field("create_time", &self.create_time)
            .field("metadata", &self.metadata)
            .finish()
    }
}

// CacheEntry is automatically Send + Sync when K, V, M are Send + Sync
// since all fields (including u64 timestamps) are Send + Sync.
