//! RocksDB-backed [`BackingStore`] implementation.
//!
//! Compaction and corruption detection mirror the embedded-store design
//! this crate is adapted from: a mutable store opened read-only that still
//! has level-0 files pending compaction is treated as corrupted, and a
//! blocking `compact()` retries a bounded number of times until the level-0
//! backlog clears.

use super::{BackingStore, OpenOutcome, WriteBatch as CacheWriteBatch};
use crate::config::CompressionType;
use crate::error::StoreError;
use rocksdb::{IteratorMode, Options, WriteBatch as RocksWriteBatch, WriteOptions, DB};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Number of level-0 files at or above which compaction is considered unfinished.
const MAX_L0_FILES: i64 = 4;

/// Maximum number of blocking `CompactRange` calls [`RocksStore::compact`] will make.
const MAX_COMPACTION_ATTEMPTS: u32 = 3;

/// A RocksDB-backed store.
pub struct RocksStore {
    db: Option<DB>,
    path: PathBuf,
    read_only: bool,
    write_opts: WriteOptions,
    compression: CompressionType,
    max_chunk_size: u64,
    max_file_size: u64,
    extend_permissions: bool,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.path)
            .field("open", &self.db.is_some())
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl RocksStore {
    /// Creates a store handle that is not yet open.
    ///
    /// `max_chunk_size` bounds the in-memory write buffer (memtable) before
    /// it is flushed to an SST file; `max_file_size` targets the size of an
    /// individual SST file. `extend_permissions` relaxes the created
    /// directory's mode to `0o777` on Unix once opened read/write.
    pub fn new(
        compression: CompressionType,
        enforce_immediate_flush: bool,
        max_chunk_size: u64,
        max_file_size: u64,
        extend_permissions: bool,
    ) -> Self {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(enforce_immediate_flush);
        RocksStore {
            db: None,
            path: PathBuf::new(),
            read_only: false,
            write_opts,
            compression,
            max_chunk_size,
            max_file_size,
            extend_permissions,
        }
    }

    fn options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(match self.compression {
            CompressionType::NoCompression => rocksdb::DBCompressionType::None,
            CompressionType::DefaultCompression => rocksdb::DBCompressionType::Lz4,
        });
        if self.max_chunk_size > 0 {
            opts.set_write_buffer_size(self.max_chunk_size as usize);
        }
        if self.max_file_size > 0 {
            opts.set_target_file_size_base(self.max_file_size);
        }
        opts
    }

    #[cfg(unix)]
    fn relax_permissions(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o777);
            let _ = std::fs::set_permissions(path, perms);
        }
    }

    #[cfg(not(unix))]
    fn relax_permissions(_path: &Path) {}

    fn db(&self) -> Result<&DB, StoreError> {
        self.db
            .as_ref()
            .ok_or_else(|| StoreError::Operation("store is not open".to_string()))
    }

    fn level0_file_count(db: &DB) -> i64 {
        db.property_int_value("rocksdb.num-files-at-level0")
            .ok()
            .flatten()
            .unwrap_or(0) as i64
    }

    fn compaction_finished(db: &DB) -> bool {
        Self::level0_file_count(db) < MAX_L0_FILES
    }
}

impl BackingStore for RocksStore {
    fn open(
        &mut self,
        path: &Path,
        read_only: bool,
        check_crc: bool,
    ) -> Result<OpenOutcome, StoreError> {
        self.path = path.to_path_buf();
        self.read_only = read_only;
        let mut opts = self.options();
        if check_crc {
            opts.set_paranoid_checks(true);
        }

        let opened = if read_only {
            DB::open_for_read_only(&opts, path, false)
        } else {
            std::fs::create_dir_all(path)?;
            if self.extend_permissions {
                Self::relax_permissions(path);
            }
            DB::open(&opts, path)
        };

        match opened {
            Ok(db) => {
                if read_only && !Self::compaction_finished(&db) {
                    warn!(path = %path.display(), "store opened read-only with pending level-0 compaction");
                    self.db = Some(db);
                    return Ok(OpenOutcome::Corrupted);
                }
                self.db = Some(db);
                Ok(OpenOutcome::Success)
            }
            Err(err) if !read_only => {
                warn!(path = %path.display(), error = %err, "store open failed, attempting repair");
                match DB::repair(&opts, path) {
                    Ok(()) => match DB::open(&opts, path) {
                        Ok(db) => {
                            info!(path = %path.display(), "store repaired successfully");
                            self.db = Some(db);
                            Ok(OpenOutcome::Repaired)
                        }
                        Err(_) => Ok(OpenOutcome::Corrupted),
                    },
                    Err(_) => Ok(OpenOutcome::Corrupted),
                }
            }
            Err(err) => Err(StoreError::OpenFailed(err.to_string())),
        }
    }

    fn close(&mut self) {
        self.db = None;
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.db()?
            .get(key.as_bytes())
            .map_err(|e| StoreError::Operation(e.to_string()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        self.db()?
            .put_opt(key.as_bytes(), value, &self.write_opts)
            .map_err(|e| StoreError::Operation(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<u64, StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let db = self.db()?;
        let existing = db
            .get(key.as_bytes())
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        let reclaimed = match &existing {
            Some(v) => (key.len() + v.len()) as u64,
            None => 0,
        };
        db.delete_opt(key.as_bytes(), &self.write_opts)
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        Ok(reclaimed)
    }

    fn delete_prefix(&self, prefix: &str, keep: &dyn Fn(&str) -> bool) -> Result<u64, StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let db = self.db()?;
        let mut reclaimed = 0u64;
        let mut batch = RocksWriteBatch::default();
        let iter = db.prefix_iterator(prefix.as_bytes());
        for item in iter {
            let (k, v) = item.map_err(|e| StoreError::Operation(e.to_string()))?;
            let key_str = match std::str::from_utf8(&k) {
                Ok(s) if s.starts_with(prefix) => s,
                _ => break,
            };
            if keep(key_str) {
                continue;
            }
            reclaimed += (k.len() + v.len()) as u64;
            batch.delete(&k);
        }
        db.write_opt(batch, &self.write_opts)
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        Ok(reclaimed)
    }

    fn apply_batch(&self, batch: &CacheWriteBatch) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let db = self.db()?;
        let mut rocks_batch = RocksWriteBatch::default();
        for op in batch.iter() {
            match op {
                super::BatchOp::Put { key, value } => rocks_batch.put(key.as_bytes(), value),
                super::BatchOp::Delete { key } => rocks_batch.delete(key.as_bytes()),
            }
        }
        db.write_opt(rocks_batch, &self.write_opts)
            .map_err(|e| StoreError::Operation(e.to_string()))
    }

    fn scan_prefix(
        &self,
        prefix: &str,
    ) -> Result<Box<dyn Iterator<Item = (String, Vec<u8>)> + '_>, StoreError> {
        let db = self.db()?;
        let prefix_owned = prefix.to_string();
        let iter = db
            .iterator(IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward))
            .filter_map(move |item| {
                let (k, v) = item.ok()?;
                let key_str = std::str::from_utf8(&k).ok()?;
                if key_str.starts_with(&prefix_owned) {
                    Some((key_str.to_string(), v.to_vec()))
                } else {
                    None
                }
            });
        Ok(Box::new(iter))
    }

    fn compact(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let db = self.db()?;
        let mut attempt = 0u32;
        loop {
            db.compact_range(None::<&[u8]>, None::<&[u8]>);
            attempt += 1;
            if attempt >= MAX_COMPACTION_ATTEMPTS || Self::compaction_finished(db) {
                break;
            }
        }
        Ok(())
    }

    fn approximate_size(&self) -> Result<u64, StoreError> {
        let db = self.db()?;
        let sizes = db.property_int_value("rocksdb.total-sst-files-size")?;
        Ok(sizes.unwrap_or(0))
    }

    fn destroy(&mut self, path: &Path) -> Result<(), StoreError> {
        self.close();
        let opts = self.options();
        DB::destroy(&opts, path).map_err(|e| StoreError::Operation(e.to_string()))
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Operation(e.to_string())
    }
}
