//! The cache engine: the coordinator tying every component together.
//!
//! [`CacheEngine`] owns the memory cache, the two on-disk stores (mutable
//! and protected), the in-RAM disk LRU index, and the protected key set. All
//! public operations serialize behind one [`parking_lot::ReentrantMutex`]
//! wrapping a [`std::cell::RefCell<EngineState>`] — a reentrant mutex hands
//! back only a shared reference even to the thread already holding it, so
//! interior mutability is still needed for the state it protects. No method
//! here re-enters the lock: shared logic lives in private helpers that take
//! `&mut EngineState` directly rather than recursing through `self`.

use crate::config::{
    CacheSettings, CompressionType, EvictionPolicy, EXPIRY_SUFFIX, EXPIRY_VALUE_SIZE,
    EVICTION_PORTION_BYTES, INTERNAL_KEY_PREFIX, MAX_DISK_USED_THRESHOLD, MIN_DISK_USED_THRESHOLD,
    NEVER_EXPIRES, PROTECTED_KEYS_RECORD, UNLIMITED_STORAGE,
};
use crate::disk_lru::{DiskEntryMeta, DiskLruIndex};
use crate::error::{CacheError, Result, StoreError};
use crate::memory::{CachedValue, MemoryCache};
use crate::protected::ProtectedKeySet;
use crate::store::rocks::RocksStore;
use crate::store::{BackingStore, OpenOutcome, WriteBatch};
use parking_lot::ReentrantMutex;
use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Which on-disk tier an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    /// The read/write store.
    Mutable,
    /// The optional read-only store consulted before the mutable store.
    Protected,
}

#[derive(Debug)]
struct EngineState {
    memory: Option<MemoryCache>,
    mutable: Option<RocksStore>,
    protected: Option<RocksStore>,
    disk_lru: Option<DiskLruIndex>,
    protected_keys: ProtectedKeySet,
    mutable_size: u64,
    max_disk_storage: u64,
}

impl Default for EngineState {
    fn default() -> Self {
        EngineState {
            memory: None,
            mutable: None,
            protected: None,
            disk_lru: None,
            protected_keys: ProtectedKeySet::new(),
            mutable_size: 0,
            max_disk_storage: UNLIMITED_STORAGE,
        }
    }
}

/// The tiered cache coordinator.
pub struct CacheEngine {
    settings: CacheSettings,
    state: ReentrantMutex<RefCell<EngineState>>,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl CacheEngine {
    /// Creates an engine in the `Created` state. Call [`Self::open`] before
    /// using it.
    pub fn new(settings: CacheSettings) -> Self {
        let max_disk_storage = settings.max_disk_storage;
        CacheEngine {
            settings,
            state: ReentrantMutex::new(RefCell::new(EngineState {
                max_disk_storage,
                ..EngineState::default()
            })),
        }
    }

    /// Opens every configured tier: memory cache, mutable store, protected store.
    ///
    /// A tier whose path is unconfigured is simply skipped. Leaves other
    /// tiers intact if one tier fails to open.
    pub fn open(&self) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        if self.settings.max_memory_cache_size > 0 && state.memory.is_none() {
            state.memory = Some(MemoryCache::new(self.settings.max_memory_cache_size));
        }

        if self.settings.disk_path_mutable.is_some() {
            self.open_mutable_tier(&mut state)?;
        }

        if self.settings.disk_path_protected.is_some() {
            self.open_protected_tier(&mut state)?;
        }

        Ok(())
    }

    /// Opens a single tier, clearing the memory cache first so stale
    /// negatives from before the reopen are never served.
    pub fn open_tier(&self, tier: CacheType) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if let Some(mem) = state.memory.as_mut() {
            mem.clear();
        }
        match tier {
            CacheType::Mutable => self.open_mutable_tier(&mut state),
            CacheType::Protected => self.open_protected_tier(&mut state),
        }
    }

    /// Closes every open tier, flushing the protected set first if dirty.
    pub fn close(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        self.flush_protected_keys(&mut state);
        if let Some(store) = state.mutable.as_mut() {
            store.close();
        }
        if let Some(store) = state.protected.as_mut() {
            store.close();
        }
        state.mutable = None;
        state.protected = None;
        state.disk_lru = None;
        state.memory = None;
    }

    /// Closes a single tier.
    pub fn close_tier(&self, tier: CacheType) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        match tier {
            CacheType::Mutable => {
                self.flush_protected_keys(&mut state);
                if let Some(store) = state.mutable.as_mut() {
                    store.close();
                }
                state.mutable = None;
                state.disk_lru = None;
            }
            CacheType::Protected => {
                if let Some(store) = state.protected.as_mut() {
                    store.close();
                }
                state.protected = None;
            }
        }
    }

    /// Clears the memory cache, the disk LRU index, the protected set, and
    /// the mutable store's on-disk directory, then reopens the mutable store.
    pub fn clear(&self) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        if let Some(mem) = state.memory.as_mut() {
            mem.clear();
        }
        state.disk_lru = None;
        state.protected_keys.clear();
        state.mutable_size = 0;

        if let Some(path) = self.settings.disk_path_mutable.clone() {
            if let Some(store) = state.mutable.as_mut() {
                store.destroy(&path).map_err(CacheError::Store)?;
            }
            self.open_mutable_tier(&mut state)?;
        }
        Ok(())
    }

    fn open_mutable_tier(&self, state: &mut EngineState) -> Result<()> {
        let path = self
            .settings
            .disk_path_mutable
            .clone()
            .ok_or(CacheError::NotReady("disk_path_mutable not configured"))?;

        let mut store = RocksStore::new(
            self.settings.compression,
            self.settings.enforce_immediate_flush,
            self.settings.max_chunk_size,
            self.settings.max_file_size,
            self.settings.extend_permissions,
        );
        let read_only = self.settings.open_options.is_read_only();
        let check_crc = self.settings.open_options.is_check_crc();

        match store.open(&path, read_only, check_crc) {
            Ok(OpenOutcome::Success) | Ok(OpenOutcome::Repaired) => {}
            Ok(OpenOutcome::Corrupted) => {
                return Err(CacheError::OpenDiskPathFailure {
                    path,
                    source: StoreError::Corrupted("mutable store corrupted".to_string()),
                });
            }
            Err(source) => return Err(CacheError::OpenDiskPathFailure { path, source }),
        }
        info!(path = %path.display(), "mutable store opened");

        if let Ok(Some(bytes)) = store.get(PROTECTED_KEYS_RECORD) {
            state.protected_keys.deserialize(&bytes);
        }

        let build_index = matches!(self.settings.eviction_policy, EvictionPolicy::LeastRecentlyUsed)
            && self.settings.max_disk_storage != UNLIMITED_STORAGE;

        let mut total_size = 0u64;

        if build_index {
            let mut disk_lru = DiskLruIndex::new();
            if let Ok(iter) = store.scan_prefix("") {
                for (k, v) in iter {
                    total_size += k.len() as u64 + v.len() as u64;
                    if k.starts_with(INTERNAL_KEY_PREFIX) {
                        continue;
                    }
                    if let Some(base) = k.strip_suffix(EXPIRY_SUFFIX) {
                        if state.protected_keys.is_protected(base) {
                            continue;
                        }
                        let expiry = std::str::from_utf8(&v)
                            .ok()
                            .and_then(|s| s.trim().parse::<i64>().ok())
                            .unwrap_or(NEVER_EXPIRES);
                        disk_lru.set_expiry(base, expiry);
                    } else {
                        if state.protected_keys.is_protected(&k) {
                            continue;
                        }
                        disk_lru.set_size(&k, v.len() as u64);
                    }
                }
            }
            state.disk_lru = Some(disk_lru);
        } else if let Ok(size) = store.approximate_size() {
            total_size = size;
        }

        state.max_disk_storage = self.settings.max_disk_storage;
        state.mutable_size = total_size;
        state.mutable = Some(store);
        Ok(())
    }

    fn open_protected_tier(&self, state: &mut EngineState) -> Result<()> {
        let path = self
            .settings
            .disk_path_protected
            .clone()
            .ok_or(CacheError::NotReady("disk_path_protected not configured"))?;

        let mut store = RocksStore::new(
            self.settings.compression,
            self.settings.enforce_immediate_flush,
            self.settings.max_chunk_size,
            self.settings.max_file_size,
            self.settings.extend_permissions,
        );
        match store.open(&path, true, self.settings.open_options.is_check_crc()) {
            Ok(OpenOutcome::Success) | Ok(OpenOutcome::Repaired) => {}
            Ok(OpenOutcome::Corrupted) => return Err(CacheError::ProtectedCacheCorrupted(path)),
            Err(source) => return Err(CacheError::OpenDiskPathFailure { path, source }),
        }
        info!(path = %path.display(), "protected store opened");
        state.protected = Some(store);
        Ok(())
    }

    fn flush_protected_keys(&self, state: &mut EngineState) {
        if state.protected_keys.is_dirty() {
            if let Some(store) = state.mutable.as_ref() {
                let bytes = state.protected_keys.serialize();
                let _ = store.put(PROTECTED_KEYS_RECORD, &bytes);
            }
        }
    }

    /// Writes raw bytes under `key`. `ttl_secs` is a relative TTL in
    /// seconds; pass [`NEVER_EXPIRES`] for an entry that never expires.
    ///
    /// Returns `false` (without writing) if eviction is disabled, the cap is
    /// finite, and this write would exceed it.
    pub fn put_bytes(&self, key: &str, value: Vec<u8>, ttl_secs: i64) -> Result<bool> {
        self.put_value(key, value, ttl_secs, None)
    }

    /// Writes `value`, encoding it to bytes for the disk tier via `encode`
    /// and keeping the decoded object itself in the memory cache so a
    /// subsequent [`Self::get_encoded`] skips decoding entirely.
    pub fn put_encoded<T, E>(&self, key: &str, value: T, ttl_secs: i64, encode: E) -> Result<bool>
    where
        T: Any + Send + Sync,
        E: FnOnce(&T) -> Vec<u8>,
    {
        let raw = encode(&value);
        let decoded: Arc<dyn Any + Send + Sync> = Arc::new(value);
        self.put_value(key, raw, ttl_secs, Some(decoded))
    }

    fn put_value(
        &self,
        key: &str,
        raw: Vec<u8>,
        ttl_secs: i64,
        decoded: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Result<bool> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        let now = now_secs();
        let is_protected = state.protected_keys.is_protected(key);
        let expiry_abs = if is_protected || ttl_secs == NEVER_EXPIRES {
            NEVER_EXPIRES
        } else {
            now.saturating_add(ttl_secs)
        };

        if let Some(mem) = state.memory.as_mut() {
            let cv = decoded
                .clone()
                .map(CachedValue::Decoded)
                .unwrap_or_else(|| CachedValue::Raw(raw.clone()));
            let cost = ((key.len() + raw.len()) as u64).max(1);
            mem.put(key.to_string(), cv, expiry_abs, cost);
        }

        // No mutable store configured: memory-only mode. The memory-cache
        // write above already happened, so this is a success, not a failure
        // (mirrors the original's null-mutable-cache early return).
        if state.mutable.is_none() {
            return Ok(true);
        }

        let expiry_key = format!("{key}{EXPIRY_SUFFIX}");
        let added_bytes = key.len() as u64
            + raw.len() as u64
            + if expiry_abs != NEVER_EXPIRES {
                expiry_key.len() as u64 + EXPIRY_VALUE_SIZE
            } else {
                0
            };
        let projected = state.mutable_size + added_bytes;

        if matches!(self.settings.eviction_policy, EvictionPolicy::None)
            && state.max_disk_storage != UNLIMITED_STORAGE
            && projected > state.max_disk_storage
        {
            return Ok(false);
        }

        let mut batch = WriteBatch::new();
        batch.put(key.to_string(), raw.clone());
        if expiry_abs != NEVER_EXPIRES {
            batch.put(expiry_key, format!("{expiry_abs:010}").into_bytes());
        }
        if state.protected_keys.is_dirty() {
            let serialized = state.protected_keys.serialize();
            batch.put(PROTECTED_KEYS_RECORD, serialized);
        }

        // The LRU is updated before the batch result is known, and the size
        // counter only on success: existing (reimplemented) behavior, see
        // the Open Questions entry in DESIGN.md.
        if !is_protected && !key.starts_with(INTERNAL_KEY_PREFIX) {
            if let Some(idx) = state.disk_lru.as_mut() {
                idx.upsert(
                    key,
                    DiskEntryMeta {
                        size: raw.len() as u64,
                        expiry: expiry_abs,
                    },
                );
            }
        }

        let store = state.mutable.as_ref().expect("checked open above");
        match store.apply_batch(&batch) {
            Ok(()) => {
                state.mutable_size = projected;
                self.evict_until_low_water(&mut state)?;
                Ok(true)
            }
            Err(err) => {
                warn!(key, error = %err, "batch apply failed");
                Ok(false)
            }
        }
    }

    /// Reads raw bytes for `key` across tiers, promoting it to
    /// most-recently-used and backfilling the memory cache on a disk hit.
    pub fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let result = self.get_internal(&mut state, key)?;
        Ok(result.and_then(|cv| match cv {
            CachedValue::Raw(bytes) => Some(bytes),
            CachedValue::Decoded(_) => None,
        }))
    }

    /// Reads `key`, decoding via `decode` on a disk-tier hit and caching the
    /// decoded object for subsequent calls. A memory-tier hit that already
    /// holds a decoded object of type `T` is returned without re-decoding.
    pub fn get_encoded<T, D>(&self, key: &str, decode: D) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
        D: FnOnce(&[u8]) -> T,
    {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let Some(cv) = self.get_internal(&mut state, key)? else {
            return Ok(None);
        };
        match cv {
            CachedValue::Decoded(obj) => Ok(obj.downcast::<T>().ok()),
            CachedValue::Raw(bytes) => {
                let value = Arc::new(decode(&bytes));
                if let Some(mem) = state.memory.as_mut() {
                    let cost = ((key.len() + bytes.len()) as u64).max(1);
                    mem.put(
                        key.to_string(),
                        CachedValue::Decoded(value.clone()),
                        NEVER_EXPIRES,
                        cost,
                    );
                }
                Ok(Some(value))
            }
        }
    }

    fn get_internal(&self, state: &mut EngineState, key: &str) -> Result<Option<CachedValue>> {
        let now = now_secs();

        if let Some(mem) = state.memory.as_mut() {
            mem.purge_expired(now);
            if let Some(cv) = mem.get(key) {
                return Ok(Some(cv.clone()));
            }
        }

        let is_protected = state.protected_keys.is_protected(key);

        if let Some(pstore) = state.protected.as_ref() {
            if let Ok(Some(bytes)) = pstore.get(key) {
                let expiry = Self::read_expiry(pstore, key);
                if expiry == NEVER_EXPIRES || expiry > now {
                    if let Some(mem) = state.memory.as_mut() {
                        let cost = ((key.len() + bytes.len()) as u64).max(1);
                        mem.put(key.to_string(), CachedValue::Raw(bytes.clone()), NEVER_EXPIRES, cost);
                    }
                    return Ok(Some(CachedValue::Raw(bytes)));
                }
            }
        }

        let Some(mstore) = state.mutable.as_ref() else {
            return Ok(None);
        };
        let Ok(Some(bytes)) = mstore.get(key) else {
            return Ok(None);
        };
        let expiry = Self::read_expiry(mstore, key);

        if expiry != NEVER_EXPIRES && expiry <= now && !is_protected {
            let expiry_key = format!("{key}{EXPIRY_SUFFIX}");
            let mut batch = WriteBatch::new();
            batch.delete(key.to_string());
            batch.delete(expiry_key.clone());
            if mstore.apply_batch(&batch).is_ok() {
                let reclaimed =
                    key.len() as u64 + bytes.len() as u64 + expiry_key.len() as u64 + EXPIRY_VALUE_SIZE;
                state.mutable_size = state.mutable_size.saturating_sub(reclaimed);
            }
            if let Some(idx) = state.disk_lru.as_mut() {
                idx.remove(key);
            }
            return Ok(None);
        }

        if let Some(idx) = state.disk_lru.as_mut() {
            idx.promote(key);
        }
        if let Some(mem) = state.memory.as_mut() {
            let mem_expiry = if is_protected { NEVER_EXPIRES } else { expiry };
            let cost = ((key.len() + bytes.len()) as u64).max(1);
            mem.put(key.to_string(), CachedValue::Raw(bytes.clone()), mem_expiry, cost);
        }
        Ok(Some(CachedValue::Raw(bytes)))
    }

    fn read_expiry(store: &RocksStore, key: &str) -> i64 {
        let expiry_key = format!("{key}{EXPIRY_SUFFIX}");
        match store.get(&expiry_key) {
            Ok(Some(bytes)) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .unwrap_or(NEVER_EXPIRES),
            _ => NEVER_EXPIRES,
        }
    }

    /// Removes `key` from every tier. Refuses (returns `false`, logs INFO)
    /// if `key` is protected.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.protected_keys.is_protected(key) {
            info!(key, "remove refused: key is protected");
            return Ok(false);
        }

        if let Some(mem) = state.memory.as_mut() {
            mem.remove(key);
        }
        if let Some(idx) = state.disk_lru.as_mut() {
            idx.remove(key);
        }
        if let Some(store) = state.mutable.as_ref() {
            if let Ok(Some(v)) = store.get(key) {
                let expiry_key = format!("{key}{EXPIRY_SUFFIX}");
                let mut reclaimed = key.len() as u64 + v.len() as u64;
                if let Ok(Some(ev)) = store.get(&expiry_key) {
                    reclaimed += expiry_key.len() as u64 + ev.len() as u64;
                }
                let mut batch = WriteBatch::new();
                batch.delete(key.to_string());
                batch.delete(expiry_key);
                if store.apply_batch(&batch).is_ok() {
                    state.mutable_size = state.mutable_size.saturating_sub(reclaimed);
                }
            }
        }
        Ok(true)
    }

    /// Removes every key under `prefix` from every tier, honoring the
    /// protected filter (a protected key under `prefix` is kept). Returns
    /// the number of bytes reclaimed from the mutable store.
    pub fn remove_keys_with_prefix(&self, prefix: &str) -> Result<u64> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        // The memory cache can hold a key backfilled from a protected-store
        // hit that was never written to the mutable store, so it must be
        // swept by its own keyspace rather than by the mutable store's scan.
        {
            let EngineState {
                memory,
                protected_keys,
                ..
            } = &mut *state;
            if let Some(mem) = memory {
                mem.remove_prefix(prefix, &|k| protected_keys.is_protected(k));
            }
        }

        let Some(store) = state.mutable.as_ref() else {
            return Ok(0);
        };

        let reclaimed = store
            .delete_prefix(prefix, &|k| state.protected_keys.is_protected(k))
            .unwrap_or(0);

        if let Some(idx) = state.disk_lru.as_mut() {
            idx.remove_prefix(prefix, |_, _| {});
        }

        state.mutable_size = state.mutable_size.saturating_sub(reclaimed);
        Ok(reclaimed)
    }

    /// Returns true if `key` is present and unexpired in any tier.
    pub fn contains(&self, key: &str) -> Result<bool> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let now = now_secs();

        if let Some(pstore) = state.protected.as_ref() {
            if matches!(pstore.contains(key), Ok(true)) {
                let expiry = Self::read_expiry(pstore, key);
                // A protected-store hit is authoritative: expired there
                // means absent, full stop, regardless of what the mutable
                // tier or memory cache might still say about the same key.
                return Ok(expiry == NEVER_EXPIRES || expiry > now);
            }
        }

        if let Some(idx) = state.disk_lru.as_ref() {
            if idx.contains(key) {
                return Ok(true);
            }
            if state.protected_keys.is_protected(key) {
                if let Some(mstore) = state.mutable.as_ref() {
                    return Ok(mstore.contains(key).unwrap_or(false));
                }
            }
            return Ok(false);
        }

        if let Some(mstore) = state.mutable.as_ref() {
            if matches!(mstore.contains(key), Ok(true)) {
                let expiry = Self::read_expiry(mstore, key);
                return Ok(expiry == NEVER_EXPIRES || expiry > now);
            }
            return Ok(false);
        }

        Ok(state.memory.as_ref().is_some_and(|mem| mem.contains_live(key, now)))
    }

    /// Protects every key in `keys` (exact key or prefix). Newly-protected
    /// keys are evicted from the disk LRU index immediately, and the memory
    /// cache is cleared wholesale so no protected entry lingers with a
    /// stale expiry. Returns true if the protected set changed.
    pub fn protect<I>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let EngineState {
            protected_keys,
            disk_lru,
            ..
        } = &mut *state;
        let changed = protected_keys.protect(keys, |k| {
            if let Some(idx) = disk_lru.as_mut() {
                idx.remove(k);
            }
        });
        if changed {
            if let Some(mem) = state.memory.as_mut() {
                mem.clear();
            }
        }
        changed
    }

    /// Releases every key in `keys`. For each prefix actually released, the
    /// mutable store is rescanned and matching keys are re-inserted into
    /// the disk LRU index. Returns true if the protected set changed.
    pub fn release<I>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let mut released = Vec::new();
        {
            let EngineState { protected_keys, .. } = &mut *state;
            protected_keys.release(keys, |k| released.push(k.to_string()));
        }
        let changed = !released.is_empty();

        if changed {
            if let Some(store) = state.mutable.as_ref() {
                for prefix in &released {
                    let Ok(iter) = store.scan_prefix(prefix) else {
                        continue;
                    };
                    let found: Vec<(String, Vec<u8>)> = iter.collect();
                    for (k, v) in found {
                        if k.ends_with(EXPIRY_SUFFIX)
                            || k == PROTECTED_KEYS_RECORD
                            || k.starts_with(INTERNAL_KEY_PREFIX)
                            || state.protected_keys.is_protected(&k)
                        {
                            continue;
                        }
                        let expiry = Self::read_expiry(store, &k);
                        if let Some(idx) = state.disk_lru.as_mut() {
                            idx.upsert(
                                &k,
                                DiskEntryMeta {
                                    size: v.len() as u64,
                                    expiry,
                                },
                            );
                        }
                    }
                }
            }
        }
        changed
    }

    /// Reports the live size of `tier`: the running counter for the mutable
    /// store, or an approximate size query for the protected store.
    pub fn size(&self, tier: CacheType) -> Result<u64> {
        let guard = self.state.lock();
        let state = guard.borrow();
        match tier {
            CacheType::Mutable => Ok(state.mutable_size),
            CacheType::Protected => state
                .protected
                .as_ref()
                .map(|s| s.approximate_size().unwrap_or(0))
                .ok_or(CacheError::NotReady("protected store not open")),
        }
    }

    /// Changes the mutable store's soft cap. If lowered, runs an eviction
    /// pass immediately and compacts.
    pub fn resize(&self, new_max: u64) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let lowered = new_max < state.max_disk_storage;
        state.max_disk_storage = new_max;
        if lowered {
            self.evict_until_low_water(&mut state)?;
            if let Some(store) = state.mutable.as_ref() {
                store.compact().map_err(CacheError::Store)?;
            }
        }
        Ok(())
    }

    /// Touches `key` in the disk LRU index. A no-op if `key` is absent
    /// (including protected keys, which the index never holds — see I3).
    pub fn promote(&self, key: &str) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if let Some(idx) = state.disk_lru.as_mut() {
            idx.promote(key);
        }
    }

    /// Runs a blocking full-range compaction on the mutable store.
    pub fn compact(&self) -> Result<()> {
        let guard = self.state.lock();
        let state = guard.borrow();
        if let Some(store) = state.mutable.as_ref() {
            store.compact().map_err(CacheError::Store)?;
        }
        Ok(())
    }

    fn evict_until_low_water(&self, state: &mut EngineState) -> Result<()> {
        if !matches!(self.settings.eviction_policy, EvictionPolicy::LeastRecentlyUsed) {
            return Ok(());
        }
        let max = state.max_disk_storage;
        if max == UNLIMITED_STORAGE {
            return Ok(());
        }
        let soft_cap = (max as f64 * MAX_DISK_USED_THRESHOLD) as u64;
        let low_water = (max as f64 * MIN_DISK_USED_THRESHOLD) as u64;
        if state.mutable_size <= soft_cap {
            return Ok(());
        }

        let start = Instant::now();
        let mut evicted = 0u64;
        let mut reclaimed_total = 0u64;
        let now = now_secs();

        let mru_first = state
            .disk_lru
            .as_ref()
            .map(DiskLruIndex::entries_mru_first)
            .unwrap_or_default();
        Self::evict_pass(state, &mru_first, low_water, &mut evicted, &mut reclaimed_total, |meta| {
            meta.expiry != NEVER_EXPIRES && meta.expiry <= now
        })?;

        if state.mutable_size > low_water {
            let lru_first = state
                .disk_lru
                .as_ref()
                .map(DiskLruIndex::entries_lru_first)
                .unwrap_or_default();
            Self::evict_pass(state, &lru_first, low_water, &mut evicted, &mut reclaimed_total, |_| true)?;
        }

        debug!(evicted, reclaimed_bytes = reclaimed_total, "eviction pass");
        info!(elapsed_ms = start.elapsed().as_millis() as u64, evicted, "eviction complete");
        Ok(())
    }

    fn evict_pass<F>(
        state: &mut EngineState,
        entries: &[(String, DiskEntryMeta)],
        low_water: u64,
        evicted: &mut u64,
        reclaimed_total: &mut u64,
        should_evict: F,
    ) -> Result<()>
    where
        F: Fn(&DiskEntryMeta) -> bool,
    {
        let Some(store) = state.mutable.as_ref() else {
            return Ok(());
        };
        let mut batch = WriteBatch::new();
        let mut batch_bytes = 0u64;
        let mut evicted_keys = Vec::new();

        for (key, meta) in entries {
            if state.mutable_size <= low_water {
                break;
            }
            if !should_evict(meta) {
                continue;
            }
            let expiry_key = format!("{key}{EXPIRY_SUFFIX}");
            let mut pair_bytes = key.len() as u64 + meta.size;
            batch.delete(key.clone());
            if meta.expiry != NEVER_EXPIRES {
                batch.delete(expiry_key.clone());
                pair_bytes += expiry_key.len() as u64 + EXPIRY_VALUE_SIZE;
            }
            state.mutable_size = state.mutable_size.saturating_sub(pair_bytes);
            *reclaimed_total += pair_bytes;
            *evicted += 1;
            batch_bytes += pair_bytes;
            evicted_keys.push(key.clone());

            if batch_bytes >= EVICTION_PORTION_BYTES {
                store.apply_batch(&batch).map_err(CacheError::Store)?;
                batch = WriteBatch::new();
                batch_bytes = 0;
            }
        }
        if !batch.is_empty() {
            store.apply_batch(&batch).map_err(CacheError::Store)?;
        }

        if let Some(idx) = state.disk_lru.as_mut() {
            for key in &evicted_keys {
                idx.remove(key);
            }
        }
        if let Some(mem) = state.memory.as_mut() {
            for key in &evicted_keys {
                mem.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvictionPolicy;
    use std::path::PathBuf;

    fn settings(dir: &std::path::Path, max_disk_storage: u64) -> CacheSettings {
        CacheSettings {
            disk_path_mutable: Some(dir.to_path_buf()),
            max_disk_storage,
            max_memory_cache_size: 0,
            ..Default::default()
        }
    }

    #[test]
    fn put_and_get_bytes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CacheEngine::new(settings(dir.path(), 1024 * 1024));
        engine.open().unwrap();
        assert!(engine.put_bytes("weather:sfo", b"72F".to_vec(), NEVER_EXPIRES).unwrap());
        assert_eq!(engine.get_bytes("weather:sfo").unwrap(), Some(b"72F".to_vec()));
    }

    #[test]
    fn expired_entry_is_absent_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CacheEngine::new(settings(dir.path(), 1024 * 1024));
        engine.open().unwrap();
        assert!(engine.put_bytes("k", b"v".to_vec(), -1).unwrap());
        assert_eq!(engine.get_bytes("k").unwrap(), None);
        assert!(!engine.contains("k").unwrap());
    }

    #[test]
    fn remove_refuses_protected_key() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CacheEngine::new(settings(dir.path(), 1024 * 1024));
        engine.open().unwrap();
        engine.put_bytes("users:1", b"alice".to_vec(), NEVER_EXPIRES).unwrap();
        engine.protect(["users:1".to_string()]);
        assert!(!engine.remove("users:1").unwrap());
        assert_eq!(engine.get_bytes("users:1").unwrap(), Some(b"alice".to_vec()));
    }

    #[test]
    fn protect_wins_over_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), 2048);
        s.eviction_policy = EvictionPolicy::LeastRecentlyUsed;
        let engine = CacheEngine::new(s);
        engine.open().unwrap();

        engine.put_bytes("protected:1", vec![0u8; 100], NEVER_EXPIRES).unwrap();
        engine.protect(["protected:1".to_string()]);

        for i in 0..40 {
            engine
                .put_bytes(&format!("filler:{i}"), vec![0u8; 50], NEVER_EXPIRES)
                .unwrap();
        }

        assert_eq!(engine.get_bytes("protected:1").unwrap(), Some(vec![0u8; 100]));
    }

    #[test]
    fn prefix_dominance_in_protected_set() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CacheEngine::new(settings(dir.path(), 1024 * 1024));
        engine.open().unwrap();
        engine.protect(["abc".to_string()]);
        engine.protect(["abcd".to_string()]);
        assert!(!engine.remove("abcd").unwrap());
    }

    #[test]
    fn remove_keys_with_prefix_keeps_protected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CacheEngine::new(settings(dir.path(), 1024 * 1024));
        engine.open().unwrap();
        engine.put_bytes("p:1", b"a".to_vec(), NEVER_EXPIRES).unwrap();
        engine.put_bytes("p:2", b"b".to_vec(), NEVER_EXPIRES).unwrap();
        engine.protect(["p:1".to_string()]);
        engine.remove_keys_with_prefix("p:").unwrap();
        assert_eq!(engine.get_bytes("p:1").unwrap(), Some(b"a".to_vec()));
        assert_eq!(engine.get_bytes("p:2").unwrap(), None);
    }

    #[test]
    fn resize_lowers_cap_and_evicts() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), 1024 * 1024);
        s.eviction_policy = EvictionPolicy::LeastRecentlyUsed;
        let engine = CacheEngine::new(s);
        engine.open().unwrap();
        for i in 0..20 {
            engine
                .put_bytes(&format!("k:{i}"), vec![0u8; 100], NEVER_EXPIRES)
                .unwrap();
        }
        engine.resize(1024).unwrap();
        assert!(engine.size(CacheType::Mutable).unwrap() <= 1024);
    }

    #[test]
    fn put_rejected_when_eviction_disabled_and_cap_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), 16);
        s.eviction_policy = EvictionPolicy::None;
        let engine = CacheEngine::new(s);
        engine.open().unwrap();
        let ok = engine.put_bytes("k", vec![0u8; 100], NEVER_EXPIRES).unwrap();
        assert!(!ok);
        assert_eq!(engine.get_bytes("k").unwrap(), None);
    }

    #[test]
    fn reopening_mutable_store_rebuilds_lru_index() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().to_path_buf();
        let s = settings(&path, 1024 * 1024);
        {
            let engine = CacheEngine::new(s.clone());
            engine.open().unwrap();
            engine.put_bytes("k", b"v".to_vec(), NEVER_EXPIRES).unwrap();
            engine.close();
        }
        let engine = CacheEngine::new(s);
        engine.open().unwrap();
        assert_eq!(engine.get_bytes("k").unwrap(), Some(b"v".to_vec()));
    }
}
