//! Tests for StorageEngine
//!
//! These tests verify:
//! - Basic get/set/delete operations
//! - Range over the on-disk index log
//! - Rotation by segment size
//! - Crash recovery from the index log
//! - Concurrent access patterns
//! - Engine lifecycle (open/close)

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use blockkv::config::{Config, SyncPolicy};
use blockkv::engine::StorageEngine;
use blockkv::error::BlockError;
use blockkv::index::INDEX_FILENAME;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(dir: &std::path::Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .sync_policy(SyncPolicy::EveryWrite)
        .without_background_compaction()
        .build()
}

fn setup_temp_engine() -> (TempDir, StorageEngine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = StorageEngine::open(config_for(temp_dir.path())).unwrap();
    (temp_dir, engine)
}

fn is_not_found<T: std::fmt::Debug>(result: blockkv::Result<T>) -> bool {
    matches!(result, Err(BlockError::KeyNotFound))
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_files() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let engine = StorageEngine::open(config_for(&data_dir)).unwrap();

    assert!(data_dir.exists());
    assert!(data_dir.join(INDEX_FILENAME).exists());
    assert!(data_dir.join(engine.active_segment()).exists());
    assert_eq!(engine.segment_count().unwrap(), 1);
}

#[test]
fn test_engine_set_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"hello", b"world").unwrap();
    assert_eq!(engine.get(b"hello").unwrap().as_ref(), b"world");
}

#[test]
fn test_engine_get_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();
    assert!(is_not_found(engine.get(b"nonexistent")));
}

#[test]
fn test_engine_last_write_wins() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"key", b"value1").unwrap();
    engine.set(b"key", b"value2").unwrap();

    assert_eq!(engine.get(b"key").unwrap().as_ref(), b"value2");
    assert_eq!(engine.len(), 1);
}

#[test]
fn test_engine_delete() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"key", b"value").unwrap();
    engine.delete(b"key").unwrap();

    assert!(is_not_found(engine.get(b"key")));
    assert!(engine.locate(b"key").is_none());
    assert!(engine.is_empty());
}

#[test]
fn test_engine_delete_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();

    engine.delete(b"nonexistent").unwrap();
    assert!(is_not_found(engine.get(b"nonexistent")));
}

#[test]
fn test_engine_set_after_delete() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"key", b"one").unwrap();
    engine.delete(b"key").unwrap();
    engine.set(b"key", b"two").unwrap();

    assert_eq!(engine.get(b"key").unwrap().as_ref(), b"two");
}

#[test]
fn test_engine_string_keys() {
    let (_temp, engine) = setup_temp_engine();

    engine.set("user:1", String::from("alice")).unwrap();
    assert_eq!(engine.get("user:1").unwrap(), "alice".as_bytes());
}

#[test]
fn test_engine_locator_round_trip() {
    let (_temp, engine) = setup_temp_engine();

    let entry = engine.set_located(b"key", b"value").unwrap();
    assert_eq!(engine.locate(b"key"), Some(entry.clone()));
    assert_eq!(engine.read_located(&entry).unwrap().as_ref(), b"value");
    assert_eq!(entry.segment, engine.active_segment());
}

// =============================================================================
// Range Tests
// =============================================================================

#[test]
fn test_engine_range_reports_liveness() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"b", b"2").unwrap();
    engine.set(b"a", b"1").unwrap();
    engine.set(b"c", b"3").unwrap();
    engine.delete(b"b").unwrap();
    engine.set(b"a", b"11").unwrap();

    let mut seen = Vec::new();
    engine
        .range(|key, live| {
            seen.push((key.to_vec(), live));
            true
        })
        .unwrap();

    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), true),
            (b"b".to_vec(), false),
            (b"c".to_vec(), true),
        ]
    );
}

#[test]
fn test_engine_range_stops_early() {
    let (_temp, engine) = setup_temp_engine();
    for i in 0..10 {
        engine.set(format!("key{}", i), b"v").unwrap();
    }

    let mut visited = 0;
    engine
        .range(|_, _| {
            visited += 1;
            visited < 3
        })
        .unwrap();
    assert_eq!(visited, 3);
}

#[test]
fn test_engine_range_empty() {
    let (_temp, engine) = setup_temp_engine();

    let mut visited = 0;
    engine
        .range(|_, _| {
            visited += 1;
            true
        })
        .unwrap();
    assert_eq!(visited, 0);
}

// =============================================================================
// Rotation Tests
// =============================================================================

#[test]
fn test_engine_rotation_scenario_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let value_a = "1234567890123456789012345678901234567890123456";

    {
        let config = Config::builder()
            .data_dir(temp_dir.path())
            .max_segment_size(64)
            .without_background_compaction()
            .build();
        let engine = StorageEngine::open(config).unwrap();

        engine.set("a", value_a).unwrap();
        let first = engine.active_segment();
        engine.set("b", "x").unwrap();

        let b = engine.locate("b").unwrap();
        assert_ne!(b.segment, first);
        assert_eq!(engine.locate("a").unwrap().segment, first);
        assert_eq!(engine.segment_count().unwrap(), 2);
        engine.close().unwrap();
    }

    let config = Config::builder()
        .data_dir(temp_dir.path())
        .max_segment_size(64)
        .without_background_compaction()
        .build();
    let engine = StorageEngine::open(config).unwrap();
    assert_eq!(engine.get("a").unwrap(), value_a.as_bytes());
    assert_eq!(engine.get("b").unwrap().as_ref(), b"x");
}

// =============================================================================
// Crash Recovery Tests
// =============================================================================

#[test]
fn test_engine_recovery_empty_store() {
    let temp_dir = TempDir::new().unwrap();

    drop(StorageEngine::open(config_for(temp_dir.path())).unwrap());

    let engine = StorageEngine::open(config_for(temp_dir.path())).unwrap();
    assert!(engine.is_empty());
    assert_eq!(engine.segment_count().unwrap(), 1);
}

#[test]
fn test_engine_recovery_matches_state_before_close() {
    let temp_dir = TempDir::new().unwrap();
    let mut expected: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();

    {
        let config = Config::builder()
            .data_dir(temp_dir.path())
            .max_segment_size(512)
            .without_background_compaction()
            .build();
        let engine = StorageEngine::open(config).unwrap();

        for i in 0..200 {
            let key = format!("key{}", i % 37).into_bytes();
            if i % 5 == 0 {
                engine.delete(&key).unwrap();
                expected.remove(&key);
            } else {
                let value = format!("value{}", i).into_bytes();
                engine.set(&key, &value).unwrap();
                expected.insert(key, value);
            }
        }

        // No close(): simulate a crash
        drop(engine);
    }

    let engine = StorageEngine::open(config_for(temp_dir.path())).unwrap();
    assert_eq!(engine.len(), expected.len());
    for (key, value) in &expected {
        assert_eq!(engine.get(key).unwrap().as_ref(), value.as_slice());
    }
}

#[test]
fn test_engine_recovery_twice() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = StorageEngine::open(config_for(temp_dir.path())).unwrap();
        engine.set(b"key", b"value").unwrap();
        engine.delete(b"gone").unwrap();
    }
    {
        let engine = StorageEngine::open(config_for(temp_dir.path())).unwrap();
        assert_eq!(engine.get(b"key").unwrap().as_ref(), b"value");
    }

    let engine = StorageEngine::open(config_for(temp_dir.path())).unwrap();
    assert_eq!(engine.get(b"key").unwrap().as_ref(), b"value");
    assert!(is_not_found(engine.get(b"gone")));
}

#[test]
fn test_engine_reopen_appends_to_same_segment() {
    let temp_dir = TempDir::new().unwrap();

    let segment = {
        let engine = StorageEngine::open(config_for(temp_dir.path())).unwrap();
        engine.set(b"a", b"1").unwrap();
        engine.active_segment()
    };

    let engine = StorageEngine::open(config_for(temp_dir.path())).unwrap();
    assert_eq!(engine.active_segment(), segment);
    engine.set(b"b", b"2").unwrap();
    assert_eq!(engine.locate(b"b").unwrap().segment, segment);
    assert_eq!(engine.get(b"a").unwrap().as_ref(), b"1");
}

#[test]
fn test_engine_open_path_convenience() {
    let temp_dir = TempDir::new().unwrap();

    let engine = StorageEngine::open_path(temp_dir.path()).unwrap();
    engine.set(b"key", b"value").unwrap();
    assert_eq!(engine.get(b"key").unwrap().as_ref(), b"value");
    engine.close().unwrap();
}

#[test]
fn test_engine_rejects_empty_data_dir() {
    let config = Config::builder().data_dir("").build();
    assert!(matches!(StorageEngine::open(config), Err(BlockError::Config(_))));
}

// =============================================================================
// Accessor Tests
// =============================================================================

#[test]
fn test_engine_accessors() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .max_segment_size(4096)
        .without_background_compaction()
        .build();
    let engine = StorageEngine::open(config).unwrap();

    assert_eq!(engine.data_dir(), temp_dir.path());
    assert_eq!(engine.config().max_segment_size, 4096);
    assert_eq!(engine.len(), 0);
    assert_eq!(engine.index_log_size(), 0);

    engine.set(b"k", b"v").unwrap();
    assert!(engine.index_log_size() > 0);
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_engine_concurrent_reads() {
    let (_temp, engine) = setup_temp_engine();
    let engine = Arc::new(engine);

    for i in 0..100 {
        engine
            .set(format!("key{}", i), format!("value{}", i))
            .unwrap();
    }

    let mut handles = vec![];
    for _ in 0..4 {
        let engine_clone = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                let key = format!("key{}", i);
                let expected = format!("value{}", i);
                assert_eq!(engine_clone.get(&key).unwrap(), expected.as_bytes());
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_engine_concurrent_writes_with_rotation() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .max_segment_size(1024)
        .without_background_compaction()
        .build();
    let engine = Arc::new(StorageEngine::open(config).unwrap());

    let mut handles = vec![];
    for t in 0..4 {
        let engine_clone = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..50 {
                let key = format!("thread{}_key{}", t, i);
                let value = format!("thread{}_value{}", t, i);
                engine_clone.set(&key, &value).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(engine.segment_count().unwrap() > 1);
    for t in 0..4 {
        for i in 0..50 {
            let key = format!("thread{}_key{}", t, i);
            let expected = format!("thread{}_value{}", t, i);
            assert_eq!(engine.get(&key).unwrap(), expected.as_bytes());
        }
    }
}

// =============================================================================
// Edge Cases
// =============================================================================

#[test]
fn test_engine_empty_key() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"", b"empty_key_value").unwrap();
    assert_eq!(engine.get(b"").unwrap().as_ref(), b"empty_key_value");
}

#[test]
fn test_engine_empty_value() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"key", b"").unwrap();
    assert!(engine.get(b"key").unwrap().is_empty());
}

#[test]
fn test_engine_large_value() {
    let (_temp, engine) = setup_temp_engine();

    let large_value = vec![0xAB; 100_000];
    engine.set(b"large_key", &large_value).unwrap();
    assert_eq!(engine.get(b"large_key").unwrap().as_ref(), large_value.as_slice());
}

#[test]
fn test_engine_binary_data() {
    let (_temp, engine) = setup_temp_engine();

    let key = b"\x00\x01\x02\xFF\xFE";
    let value = b"\xFF\x00\xAB\xCD\x00";

    engine.set(key, value).unwrap();
    assert_eq!(engine.get(key).unwrap().as_ref(), value);
}
