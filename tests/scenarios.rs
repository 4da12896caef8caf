//! End-to-end cache engine scenarios.
//!
//! Each test below reproduces one of the six canonical scenarios the engine
//! is specified against: basic TTL expiry, LRU eviction, protection winning
//! over eviction, remove refusing a protected key, prefix dominance in the
//! protected set, and a protected store that fails to open cleanly.

use std::thread;
use std::time::Duration;
use tiered_cache::config::{CacheSettings, EvictionPolicy, NEVER_EXPIRES};
use tiered_cache::engine::{CacheEngine, CacheType};
use tiered_cache::error::CacheError;
use tiered_cache::store::rocks::RocksStore;
use tiered_cache::store::BackingStore;

fn mutable_only(dir: &std::path::Path, max_disk_storage: u64) -> CacheSettings {
    CacheSettings {
        disk_path_mutable: Some(dir.to_path_buf()),
        max_disk_storage,
        max_memory_cache_size: 0,
        ..Default::default()
    }
}

#[test]
fn basic_ttl_expires_and_frees_space() {
    let dir = tempfile::tempdir().unwrap();
    let settings = CacheSettings {
        max_memory_cache_size: 1024 * 1024,
        ..mutable_only(dir.path(), tiered_cache::config::UNLIMITED_STORAGE)
    };
    let engine = CacheEngine::new(settings);
    engine.open().unwrap();

    assert!(engine.put_bytes("a", vec![0x01], 1).unwrap());
    assert_eq!(engine.get_bytes("a").unwrap(), Some(vec![0x01]));

    thread::sleep(Duration::from_secs(2));

    assert_eq!(engine.get_bytes("a").unwrap(), None);
    assert!(!engine.contains("a").unwrap());
    assert_eq!(engine.size(CacheType::Mutable).unwrap(), 0);
}

#[test]
fn lru_eviction_keeps_cap_under_low_water() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = mutable_only(dir.path(), 100);
    settings.eviction_policy = EvictionPolicy::LeastRecentlyUsed;
    let engine = CacheEngine::new(settings);
    engine.open().unwrap();

    for i in 0..10 {
        engine
            .put_bytes(&format!("k{i}"), vec![0u8; 10], NEVER_EXPIRES)
            .unwrap();
    }
    engine.put_bytes("k10", vec![0u8; 10], NEVER_EXPIRES).unwrap();

    assert_eq!(engine.get_bytes("k0").unwrap(), None);
    assert_eq!(engine.get_bytes("k10").unwrap(), Some(vec![0u8; 10]));
    assert!(engine.size(CacheType::Mutable).unwrap() <= 85);
}

#[test]
fn protect_wins_over_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = mutable_only(dir.path(), 50);
    settings.eviction_policy = EvictionPolicy::LeastRecentlyUsed;
    let engine = CacheEngine::new(settings);
    engine.open().unwrap();

    engine.put_bytes("p/1", vec![0u8; 40], NEVER_EXPIRES).unwrap();
    engine.protect(["p/".to_string()]);
    engine.put_bytes("q", vec![0u8; 20], NEVER_EXPIRES).unwrap();
    engine.put_bytes("r", vec![0u8; 20], NEVER_EXPIRES).unwrap();

    assert_eq!(engine.get_bytes("p/1").unwrap(), Some(vec![0u8; 40]));
    assert_eq!(engine.get_bytes("r").unwrap(), Some(vec![0u8; 20]));
}

#[test]
fn remove_refuses_protected_but_prefix_removal_reports_success() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = mutable_only(dir.path(), 50);
    settings.eviction_policy = EvictionPolicy::LeastRecentlyUsed;
    let engine = CacheEngine::new(settings);
    engine.open().unwrap();

    engine.put_bytes("p/1", vec![0u8; 40], NEVER_EXPIRES).unwrap();
    engine.protect(["p/".to_string()]);

    assert!(!engine.remove("p/1").unwrap());
    assert_eq!(engine.get_bytes("p/1").unwrap(), Some(vec![0u8; 40]));

    engine.remove_keys_with_prefix("p/").unwrap();
    assert_eq!(engine.get_bytes("p/1").unwrap(), Some(vec![0u8; 40]));
}

#[test]
fn prefix_dominance_collapses_to_shortest_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::new(mutable_only(dir.path(), 1024 * 1024));
    engine.open().unwrap();

    engine.protect(["abc".to_string()]);
    engine.protect(["abcd".to_string()]);
    engine.protect(["ab".to_string()]);

    engine.put_bytes("abcxyz", b"v".to_vec(), NEVER_EXPIRES).unwrap();
    assert!(!engine.remove("abcxyz").unwrap());
    assert!(!engine.remove("ab").unwrap());
    assert!(!engine.remove("abc").unwrap());
}

#[test]
fn open_reports_protected_cache_corrupted_but_mutable_tier_still_usable() {
    let protected_dir = tempfile::tempdir().unwrap();

    // Force an unfinished compaction: write several batches without ever
    // compacting, leaving more than MAX_L0_FILES level-0 SST files behind.
    {
        let mut store = RocksStore::new(
            tiered_cache::config::CompressionType::DefaultCompression,
            true,
            0,
            0,
            false,
        );
        store.open(protected_dir.path(), false, false).unwrap();
        for batch in 0..8 {
            let mut w = tiered_cache::store::WriteBatch::new();
            for i in 0..50 {
                w.put(format!("k{batch}:{i}"), vec![0u8; 256]);
            }
            store.apply_batch(&w).unwrap();
        }
        store.close();
    }

    let mutable_dir = tempfile::tempdir().unwrap();
    let settings = CacheSettings {
        disk_path_mutable: Some(mutable_dir.path().to_path_buf()),
        disk_path_protected: Some(protected_dir.path().to_path_buf()),
        max_memory_cache_size: 0,
        ..Default::default()
    };
    let engine = CacheEngine::new(settings);

    match engine.open() {
        Err(CacheError::ProtectedCacheCorrupted(path)) => {
            assert_eq!(path, protected_dir.path());
        }
        other => panic!("expected ProtectedCacheCorrupted, got {other:?}"),
    }

    // `open()` opens the mutable tier before attempting the protected tier,
    // so it is already usable despite the error returned above.
    assert!(engine.put_bytes("m", b"v".to_vec(), NEVER_EXPIRES).unwrap());
    assert_eq!(engine.get_bytes("m").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn zero_memory_cache_size_disables_memory_tier() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::new(mutable_only(dir.path(), 1024 * 1024));
    engine.open().unwrap();

    engine.put_bytes("k", b"v".to_vec(), NEVER_EXPIRES).unwrap();
    assert_eq!(engine.get_bytes("k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn unlimited_storage_disables_the_disk_lru_index() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = mutable_only(dir.path(), tiered_cache::config::UNLIMITED_STORAGE);
    settings.eviction_policy = EvictionPolicy::LeastRecentlyUsed;
    let engine = CacheEngine::new(settings);
    engine.open().unwrap();

    for i in 0..200 {
        engine
            .put_bytes(&format!("k{i}"), vec![0u8; 64], NEVER_EXPIRES)
            .unwrap();
    }
    assert_eq!(engine.get_bytes("k0").unwrap(), Some(vec![0u8; 64]));
    assert!(engine.size(CacheType::Mutable).unwrap() > 0);
}

#[test]
fn contains_is_false_for_key_expired_in_protected_store_even_if_live_in_mutable() {
    let mutable_dir = tempfile::tempdir().unwrap();
    let protected_dir = tempfile::tempdir().unwrap();

    {
        let mut store = RocksStore::new(
            tiered_cache::config::CompressionType::DefaultCompression,
            true,
            0,
            0,
            false,
        );
        store.open(protected_dir.path(), false, false).unwrap();
        store.put("dup", b"stale").unwrap();
        // Expiry far in the past: the protected-store copy is dead.
        store.put("dup::expiry", b"0000000001").unwrap();
        store.close();
    }

    let settings = CacheSettings {
        disk_path_mutable: Some(mutable_dir.path().to_path_buf()),
        disk_path_protected: Some(protected_dir.path().to_path_buf()),
        max_memory_cache_size: 0,
        ..Default::default()
    };
    let engine = CacheEngine::new(settings);
    engine.open().unwrap();

    // The mutable store holds a live, non-expiring copy of the same key.
    engine.put_bytes("dup", b"fresh".to_vec(), NEVER_EXPIRES).unwrap();

    // The protected store shadows it and is authoritative: its copy is
    // expired, so the key must be reported absent regardless of the
    // mutable tier's copy.
    assert!(!engine.contains("dup").unwrap());
}

#[test]
fn memory_only_mode_round_trips_with_default_settings() {
    // `CacheSettings::default()` configures neither disk path: this is the
    // documented out-of-the-box configuration, and `put`/`get` must work
    // purely against the memory cache.
    let settings = CacheSettings::default();
    let engine = CacheEngine::new(settings);
    engine.open().unwrap();

    assert!(engine.put_bytes("k", b"v".to_vec(), NEVER_EXPIRES).unwrap());
    assert_eq!(engine.get_bytes("k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn remove_keys_with_prefix_sweeps_memory_only_backfilled_key() {
    let mutable_dir = tempfile::tempdir().unwrap();
    let protected_dir = tempfile::tempdir().unwrap();

    {
        let mut store = RocksStore::new(
            tiered_cache::config::CompressionType::DefaultCompression,
            true,
            0,
            0,
            false,
        );
        store.open(protected_dir.path(), false, false).unwrap();
        store.put("p:1", b"from-protected").unwrap();
        store.close();
    }

    let settings = CacheSettings {
        disk_path_mutable: Some(mutable_dir.path().to_path_buf()),
        disk_path_protected: Some(protected_dir.path().to_path_buf()),
        max_memory_cache_size: 1024 * 1024,
        ..Default::default()
    };
    let engine = CacheEngine::new(settings);
    engine.open().unwrap();

    // Backfills the memory cache from the protected store; `p:1` never
    // touches the mutable store, so a prefix removal driven solely by a
    // mutable-store scan would miss it.
    assert_eq!(
        engine.get_bytes("p:1").unwrap(),
        Some(b"from-protected".to_vec())
    );

    // Close the protected tier so a later read can no longer be served by
    // re-fetching from it: the only remaining copy is the memory-cache one.
    engine.close_tier(CacheType::Protected);

    engine.remove_keys_with_prefix("p:").unwrap();
    assert_eq!(engine.get_bytes("p:1").unwrap(), None);
}
