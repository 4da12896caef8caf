//! Cache Configuration
//!
//! A single, plain-field `CacheSettings` struct controls every tier of the
//! engine: the in-memory LRU, the mutable on-disk store, and the optional
//! read-only protected store. Fields have no constructors or builder
//! methods — just set what you need and take `Default` for the rest.
//!
//! # Sizing Guidelines
//!
//! `max_memory_cache_size` bounds the in-process LRU (set to `0` to disable
//! it entirely and go straight to disk on every read). `max_disk_storage`
//! bounds the mutable store; once the live size crosses 90% of this value
//! the engine runs an eviction pass down to 85%. Both defaults come from
//! the embedded-store settings this design is modeled on (32 MiB of disk,
//! 1 MiB of memory).

use std::path::PathBuf;

/// Per-call relative expiry meaning "this entry never expires".
pub const NEVER_EXPIRES: i64 = i64::MAX;

/// Sentinel for `max_disk_storage` meaning "no cap, never evict".
pub const UNLIMITED_STORAGE: u64 = u64::MAX;

/// High-water mark (fraction of `max_disk_storage`) that triggers eviction.
pub const MAX_DISK_USED_THRESHOLD: f64 = 0.9;

/// Low-water mark (fraction of `max_disk_storage`) eviction stops at.
pub const MIN_DISK_USED_THRESHOLD: f64 = 0.85;

/// Maximum number of bytes evicted per eviction chunk.
pub const EVICTION_PORTION_BYTES: u64 = 1024 * 1024;

/// Fixed width, in ASCII decimal digits, of a serialized expiry value.
pub const EXPIRY_VALUE_SIZE: u64 = 10;

/// Suffix appended to a key to name its expiry companion record.
pub const EXPIRY_SUFFIX: &str = "::expiry";

/// Key under which the serialized protected-key set is stored.
pub const PROTECTED_KEYS_RECORD: &str = "internal::protected::protected_data";

/// Prefix reserved for internal bookkeeping records, excluded from the LRU.
pub const INTERNAL_KEY_PREFIX: &str = "internal::";

/// Bitflag-style options controlling how a backing store is opened.
///
/// Modeled as a `u8` bitmask (mirroring a C-style options enum) rather than
/// the `bitflags` crate, since only two independent bits are ever combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenOptions(u8);

impl OpenOptions {
    /// No special behavior: read/write, no CRC verification.
    pub const DEFAULT: OpenOptions = OpenOptions(0x00);
    /// Open the store read-only; writes are rejected.
    pub const READ_ONLY: OpenOptions = OpenOptions(0x01);
    /// Verify checksums on every read.
    pub const CHECK_CRC: OpenOptions = OpenOptions(0x02);

    /// Returns true if the `READ_ONLY` bit is set.
    pub fn is_read_only(self) -> bool {
        self.0 & Self::READ_ONLY.0 != 0
    }

    /// Returns true if the `CHECK_CRC` bit is set.
    pub fn is_check_crc(self) -> bool {
        self.0 & Self::CHECK_CRC.0 != 0
    }

    /// Combines two option sets.
    pub fn union(self, other: OpenOptions) -> OpenOptions {
        OpenOptions(self.0 | other.0)
    }
}

/// Eviction strategy applied to the mutable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// No eviction: writes that would exceed `max_disk_storage` are rejected.
    None,
    /// Evict least-recently-used entries to stay under the soft cap.
    #[default]
    LeastRecentlyUsed,
}

/// Block compression applied by the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    /// Store blocks uncompressed.
    NoCompression,
    /// Use the backing store's default compression algorithm.
    #[default]
    DefaultCompression,
}

/// Settings for one `CacheEngine` instance.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Directory for the mutable (read/write) on-disk store. `None` disables it.
    pub disk_path_mutable: Option<PathBuf>,
    /// Directory for the protected (read-only) on-disk store. `None` disables it.
    pub disk_path_protected: Option<PathBuf>,
    /// Soft cap on the live size of the mutable store, in bytes.
    pub max_disk_storage: u64,
    /// Maximum size of a single on-disk chunk/SST file family, in bytes.
    pub max_chunk_size: u64,
    /// If true, every write is synced to disk before `put` returns.
    pub enforce_immediate_flush: bool,
    /// Target maximum size of an individual on-disk file, in bytes.
    pub max_file_size: u64,
    /// Bound on the in-memory LRU cache, in bytes. `0` disables the memory tier.
    pub max_memory_cache_size: u64,
    /// Flags controlling how stores are opened.
    pub open_options: OpenOptions,
    /// Eviction strategy for the mutable store.
    pub eviction_policy: EvictionPolicy,
    /// Compression applied by the backing store.
    pub compression: CompressionType,
    /// On Unix, relax created file/directory permissions to 0666/0777.
    pub extend_permissions: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            disk_path_mutable: None,
            disk_path_protected: None,
            max_disk_storage: 32 * 1024 * 1024,
            max_chunk_size: 32 * 1024 * 1024,
            enforce_immediate_flush: true,
            max_file_size: 2 * 1024 * 1024,
            max_memory_cache_size: 1024 * 1024,
            open_options: OpenOptions::DEFAULT,
            eviction_policy: EvictionPolicy::LeastRecentlyUsed,
            compression: CompressionType::DefaultCompression,
            extend_permissions: false,
        }
    }
}
