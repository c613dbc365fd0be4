//! Tests for Engine
//!
//! These tests verify:
//! - Save/load/select/update/delete through the facade
//! - The offset properties of in-place updates, relocation and tombstones
//! - Index rebuild when the index file is missing, corrupt or stale
//! - Encoding failures leave the log untouched
//! - Writer lock and concurrent access

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::{NaiveDate, NaiveDateTime};
use jsonlkv::log::{parse_line, ParsedLine};
use jsonlkv::{Config, Engine, Key, KeyPolicy, StoreError, SyncStrategy};
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn store_config(temp_dir: &TempDir) -> Config {
    Config::builder()
        .log_path(temp_dir.path().join("store").join("data.jsonl"))
        .sync_strategy(SyncStrategy::EveryWrite)
        .build()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(store_config(&temp_dir)).unwrap();
    (temp_dir, engine)
}

fn setup_abc_engine() -> (TempDir, Engine) {
    let (temp_dir, engine) = setup_temp_engine();
    engine
        .save([
            ("a", json!({"v": 1})),
            ("b", json!({"v": 2})),
            ("c", json!({"v": 3})),
        ])
        .unwrap();
    (temp_dir, engine)
}

fn log_bytes(engine: &Engine) -> Vec<u8> {
    fs::read(engine.log_path()).unwrap()
}

fn offset(engine: &Engine, key: &str) -> u64 {
    engine.offset_of(key).unwrap().unwrap()
}

fn keys_of(records: &jsonlkv::Records) -> Vec<String> {
    records.keys().map(|k| k.to_string()).collect()
}

/// Every live key's offset points at a line holding that key
fn assert_index_agrees(engine: &Engine) {
    let bytes = log_bytes(engine);
    let live = engine.load().unwrap();
    assert_eq!(engine.stats().unwrap().record_count, live.len());

    for (key, value) in &live {
        let canonical = key.canonical();
        let start = offset(engine, &canonical) as usize;
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |p| start + p + 1);
        assert_eq!(
            parse_line(&bytes[start..end]),
            ParsedLine::Record {
                key: canonical.into_owned(),
                value: value.clone(),
            }
        );
    }
}

fn touch_future(path: &std::path::Path) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();
}

fn ts(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_engine_open_creates_log_and_index() {
    let temp_dir = TempDir::new().unwrap();
    let config = store_config(&temp_dir);
    let log_path = config.log_path.clone();
    let index_path = config.index_path();

    let engine = Engine::open(config).unwrap();

    assert!(log_path.exists());
    assert!(index_path.exists());
    assert_eq!(engine.log_path(), log_path.as_path());
    assert!(engine.load().unwrap().is_empty());
}

#[test]
fn test_engine_open_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_path(temp_dir.path().join("data.jsonl"))
        .buffer_size(0)
        .build();

    assert!(matches!(Engine::open(config), Err(StoreError::Config(_))));
}

#[test]
fn test_engine_open_rejects_lock_suffix_used_for_staging() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_path(temp_dir.path().join("data.jsonl"))
        .lock_suffix(".compact")
        .build();

    assert!(matches!(Engine::open(config), Err(StoreError::Config(_))));
}

#[test]
fn test_engine_reopen_sees_data() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(store_config(&temp_dir)).unwrap();
        engine.put("k", json!({"v": 1})).unwrap();
    }

    let engine = Engine::open(store_config(&temp_dir)).unwrap();
    assert_eq!(engine.get("k").unwrap(), Some(json!({"v": 1})));
}

#[cfg(unix)]
#[test]
fn test_second_engine_is_locked_out() {
    let temp_dir = TempDir::new().unwrap();
    let _first = Engine::open(store_config(&temp_dir)).unwrap();

    let second = Engine::open(store_config(&temp_dir));

    assert!(matches!(second, Err(StoreError::Locked { .. })));
}

#[test]
fn test_engine_without_lock_takes_no_lock_file() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = store_config(&temp_dir);
    config.advisory_lock = false;
    let lock_path = config.lock_path();

    let _engine = Engine::open(config).unwrap();

    assert!(!lock_path.exists());
}

// =============================================================================
// Worked Example
// =============================================================================

#[test]
fn test_select_delete_grow_compact_scenario() {
    let (_temp, engine) = setup_abc_engine();

    let hits = engine.select(Some("a"), Some("b")).unwrap();
    assert_eq!(keys_of(&hits), vec!["a", "b"]);
    assert_eq!(hits.get(&Key::from("a")), Some(&json!({"v": 1})));
    assert_eq!(hits.get(&Key::from("b")), Some(&json!({"v": 2})));

    engine.delete(["a"]).unwrap();
    let live = engine.load().unwrap();
    assert_eq!(keys_of(&live), vec!["b", "c"]);

    let c_before = offset(&engine, "c");
    let end = log_bytes(&engine).len() as u64;
    let report = engine
        .update([("b", json!({"v": 2, "extra": "grows"}))])
        .unwrap();
    assert_eq!(report.relocated, 1);
    assert_eq!(offset(&engine, "b"), end);
    assert_eq!(offset(&engine, "c"), c_before);

    engine.compact().unwrap();
    let text = String::from_utf8(log_bytes(&engine)).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec!["{\"b\":{\"extra\":\"grows\",\"v\":2}}", "{\"c\":{\"v\":3}}"]
    );

    let index: HashMap<String, u64> =
        serde_json::from_slice(&fs::read(engine.index_path()).unwrap()).unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index["b"], 0);
}

// =============================================================================
// Property Tests
// =============================================================================

#[test]
fn test_save_load_round_trip() {
    let (_temp, engine) = setup_temp_engine();
    let input: Vec<(String, Value)> = (0..50)
        .map(|i| (format!("key{:03}", i), json!({"i": i, "s": "x".repeat(i)})))
        .collect();

    engine.save(input.clone()).unwrap();
    let loaded = engine.load().unwrap();

    assert_eq!(loaded.len(), input.len());
    for (k, v) in &input {
        assert_eq!(loaded.get(&Key::from(k)), Some(v));
    }
}

#[test]
fn test_index_agrees_after_mixed_operations() {
    let (_temp, engine) = setup_temp_engine();

    engine
        .save((0..20).map(|i| (format!("k{:02}", i), json!(i))))
        .unwrap();
    engine.update([("k03", json!("much longer than before"))]).unwrap();
    engine.update([("k04", json!(0))]).unwrap();
    engine.delete(["k05", "k06", "nope"]).unwrap();
    engine.update([("k99", json!({"new": true})), ("k07", json!(7))]).unwrap();
    engine.delete_range(Some("k10"), Some("k12")).unwrap();

    assert_index_agrees(&engine);

    engine.compact().unwrap();
    assert_index_agrees(&engine);
}

#[test]
fn test_in_place_update_keeps_all_offsets() {
    let (_temp, engine) = setup_abc_engine();
    let before: Vec<u64> = ["a", "b", "c"].iter().map(|k| offset(&engine, k)).collect();
    let len = log_bytes(&engine).len();

    let report = engine
        .update([("b", json!({"v": 9})), ("c", json!(0))])
        .unwrap();

    assert_eq!(report.in_place, 2);
    let after: Vec<u64> = ["a", "b", "c"].iter().map(|k| offset(&engine, k)).collect();
    assert_eq!(before, after);
    assert_eq!(log_bytes(&engine).len(), len);
    assert_eq!(engine.get("c").unwrap(), Some(json!(0)));
}

#[test]
fn test_tombstone_isolation() {
    let (_temp, engine) = setup_abc_engine();
    let len = log_bytes(&engine).len();
    let a = offset(&engine, "a");
    let c = offset(&engine, "c");

    let report = engine.delete(["b"]).unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(engine.offset_of("b").unwrap(), None);
    assert_eq!(engine.get("b").unwrap(), None);
    assert_eq!(log_bytes(&engine).len(), len);
    assert_eq!(offset(&engine, "a"), a);
    assert_eq!(offset(&engine, "c"), c);
    assert_eq!(engine.get("a").unwrap(), Some(json!({"v": 1})));
    assert_eq!(engine.get("c").unwrap(), Some(json!({"v": 3})));
}

#[test]
fn test_range_inclusivity() {
    let (_temp, engine) = setup_temp_engine();
    engine
        .save([("a", 1), ("b", 2), ("c", 3), ("d", 4), ("e", 5)])
        .unwrap();

    assert_eq!(keys_of(&engine.select(Some("b"), Some("d")).unwrap()), vec!["b", "c", "d"]);
    assert_eq!(keys_of(&engine.select(Some("c"), Some("c")).unwrap()), vec!["c"]);
    assert!(engine.select(Some("cc"), Some("cc")).unwrap().is_empty());
    assert!(engine.select(Some("d"), Some("b")).unwrap().is_empty());
    assert_eq!(keys_of(&engine.select(None::<&str>, Some("b")).unwrap()), vec!["a", "b"]);
    assert_eq!(engine.select(None::<&str>, None::<&str>).unwrap().len(), 5);
}

#[test]
fn test_compaction_idempotence() {
    let (_temp, engine) = setup_abc_engine();
    engine.delete(["a"]).unwrap();
    engine.update([("c", json!({"v": 3, "more": [1, 2, 3]}))]).unwrap();
    let before = engine.load().unwrap();

    engine.compact().unwrap();
    let once = log_bytes(&engine);
    engine.compact().unwrap();

    assert_eq!(log_bytes(&engine), once);
    assert_eq!(engine.load().unwrap(), before);
}

// =============================================================================
// Update / Delete Tests
// =============================================================================

#[test]
fn test_put_and_get() {
    let (_temp, engine) = setup_temp_engine();

    let report = engine.put("x", json!([1, 2])).unwrap();

    assert_eq!(report.appended, 1);
    assert_eq!(engine.get("x").unwrap(), Some(json!([1, 2])));
    assert_eq!(engine.get("y").unwrap(), None);
}

#[test]
fn test_encoding_failure_leaves_log_untouched() {
    let (_temp, engine) = setup_abc_engine();
    let before = log_bytes(&engine);

    let mut bad: HashMap<(i32, i32), i32> = HashMap::new();
    bad.insert((1, 2), 3);
    let result = engine.update([("z", HashMap::new()), ("a", bad)]);

    match result {
        Err(StoreError::Encoding { key, .. }) => assert_eq!(key, "a"),
        other => panic!("expected encoding error, got {:?}", other),
    }
    assert_eq!(log_bytes(&engine), before);
    assert_eq!(engine.get("z").unwrap(), None);
    assert_eq!(engine.get("a").unwrap(), Some(json!({"v": 1})));
}

#[test]
fn test_delete_range() {
    let (_temp, engine) = setup_temp_engine();
    engine
        .save([("a", 1), ("b", 2), ("c", 3), ("d", 4)])
        .unwrap();

    let report = engine.delete_range(Some("b"), Some("c")).unwrap();

    assert_eq!(report.deleted, 2);
    assert_eq!(keys_of(&engine.load().unwrap()), vec!["a", "d"]);
}

#[test]
fn test_delete_range_open_bound() {
    let (_temp, engine) = setup_abc_engine();

    let report = engine.delete_range(Some("b"), None::<&str>).unwrap();

    assert_eq!(report.deleted, 2);
    assert_eq!(keys_of(&engine.load().unwrap()), vec!["a"]);
}

#[test]
fn test_delete_unknown_keys() {
    let (_temp, engine) = setup_abc_engine();
    let before = log_bytes(&engine);

    let report = engine.delete(["x", "y"]).unwrap();

    assert_eq!(report.deleted, 0);
    assert_eq!(report.missing, 2);
    assert_eq!(log_bytes(&engine), before);
}

#[test]
fn test_save_empty_clears_store() {
    let (_temp, engine) = setup_abc_engine();

    engine.save(Vec::<(&str, Value)>::new()).unwrap();

    assert!(engine.load().unwrap().is_empty());
    assert!(log_bytes(&engine).is_empty());
    assert_eq!(engine.stats().unwrap().record_count, 0);
}

#[test]
fn test_on_publish_sync_strategy() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_path(temp_dir.path().join("data.jsonl"))
        .sync_strategy(SyncStrategy::OnPublish)
        .build();
    let engine = Engine::open(config).unwrap();

    engine.put("a", 1).unwrap();
    engine.put("a", 2).unwrap();

    assert_eq!(engine.get("a").unwrap(), Some(json!(2)));
}

// =============================================================================
// Index Rebuild Tests
// =============================================================================

#[test]
fn test_missing_index_is_rebuilt() {
    let temp_dir = TempDir::new().unwrap();
    let index_path = {
        let engine = Engine::open(store_config(&temp_dir)).unwrap();
        engine.save([("a", 1), ("b", 2)]).unwrap();
        engine.index_path().to_path_buf()
    };
    fs::remove_file(&index_path).unwrap();

    let engine = Engine::open(store_config(&temp_dir)).unwrap();

    assert!(index_path.exists());
    assert_eq!(engine.get("b").unwrap(), Some(json!(2)));
}

#[test]
fn test_corrupt_index_is_rebuilt() {
    let temp_dir = TempDir::new().unwrap();
    let index_path = {
        let engine = Engine::open(store_config(&temp_dir)).unwrap();
        engine.save([("a", 1), ("b", 2)]).unwrap();
        engine.index_path().to_path_buf()
    };
    fs::write(&index_path, b"{\"a\": 0, \"b\":").unwrap();

    let engine = Engine::open(store_config(&temp_dir)).unwrap();

    assert_eq!(engine.select(Some("a"), Some("b")).unwrap().len(), 2);
}

#[test]
fn test_index_older_than_log_is_rebuilt() {
    let (_temp, engine) = setup_abc_engine();

    // Another writer appends behind the engine's back
    let mut file = OpenOptions::new().append(true).open(engine.log_path()).unwrap();
    file.write_all(b"{\"z\":26}\n").unwrap();
    drop(file);
    touch_future(engine.log_path());

    assert_eq!(engine.get("z").unwrap(), Some(json!(26)));
    assert_eq!(engine.stats().unwrap().record_count, 4);
}

#[test]
fn test_reindex_reports_scan() {
    let (_temp, engine) = setup_abc_engine();
    engine.delete(["b"]).unwrap();

    let report = engine.reindex().unwrap();

    assert_eq!(report.lines_scanned, 3);
    assert_eq!(report.records_indexed, 2);
    assert_eq!(report.blank_lines, 1);
}

// =============================================================================
// Key Policy Tests
// =============================================================================

#[test]
fn test_timestamp_keys() {
    let (_temp, engine) = setup_temp_engine();
    engine
        .save((1..=5).map(|d| (ts(d, 12), json!({"day": d}))))
        .unwrap();

    let hits = engine.select(Some(ts(2, 0)), Some(ts(4, 12))).unwrap();

    assert_eq!(hits.len(), 3);
    let first = hits.keys().next().unwrap();
    assert_eq!(first.as_timestamp(), Some(&ts(2, 12)));
    assert_eq!(engine.get(ts(5, 12)).unwrap(), Some(json!({"day": 5})));
}

#[test]
fn test_text_policy_keeps_timestamp_strings() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .log_path(temp_dir.path().join("data.jsonl"))
        .key_policy(KeyPolicy::Text)
        .build();
    let engine = Engine::open(config).unwrap();
    engine.put("2024-01-01T00:00:00", 1).unwrap();

    let loaded = engine.load().unwrap();

    assert_eq!(
        loaded.keys().next().and_then(|k| k.as_text()),
        Some("2024-01-01T00:00:00")
    );
}

#[test]
fn test_loaded_keys_reach_their_records() {
    let (_temp, engine) = setup_temp_engine();
    engine
        .update([("2024-01-01T 0:00:00", json!(1)), ("2024-01-01T00:00:00", json!(2))])
        .unwrap();

    let loaded = engine.load().unwrap();
    assert_eq!(loaded.len(), 2);

    let keys: Vec<Key> = loaded.keys().cloned().collect();
    let report = engine.delete(&keys).unwrap();

    assert_eq!(report.deleted, 2);
    assert!(engine.load().unwrap().is_empty());
}

// =============================================================================
// Stats Tests
// =============================================================================

#[test]
fn test_stats() {
    let (_temp, engine) = setup_abc_engine();
    engine.delete(["a"]).unwrap();

    let stats = engine.stats().unwrap();

    assert_eq!(stats.record_count, 2);
    assert_eq!(stats.min_key, Some(Key::from("b")));
    assert_eq!(stats.max_key, Some(Key::from("c")));
    assert_eq!(stats.size_bytes, log_bytes(&engine).len() as u64);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let (_temp, engine) = setup_temp_engine();
    let engine = Arc::new(engine);

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..25 {
                    engine
                        .put(format!("t{}-{:02}", t, i), json!({"i": i}))
                        .unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..25 {
                    engine.select(Some("t0"), Some("t9")).unwrap();
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    assert_eq!(engine.load().unwrap().len(), 100);
    assert_index_agrees(&engine);
}
