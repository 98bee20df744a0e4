//! Tests for online AOF rewrite
//!
//! These tests verify:
//! - The rewritten log is the reconstruction of the live keyspace
//! - Expiries survive and expired keys are dropped
//! - Writes racing a rewrite are kept, in order
//! - Large values are rewritten as several bounded commands
//! - Only one rewrite runs at a time
//! - Automatic rewrite after the configured threshold

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use aofkv::aof::{AofPersister, Persister};
use aofkv::config::{AofSyncStrategy, Config};
use aofkv::dispatch::Context;
use aofkv::engine::Engine;
use aofkv::error::KvError;
use aofkv::protocol::{encode_command, Reply, DEFAULT_MAX_ARRAY_LEN};
use aofkv::store::{now_ms, ITEMS_PER_CMD};
use bytes::Bytes;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .aof_sync_strategy(AofSyncStrategy::EveryWrite)
        .auto_rewrite_after(None)
        .build()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    (temp_dir, engine)
}

fn exec(engine: &Engine, items: &[&str]) -> Reply {
    let args = items.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())).collect();
    engine.execute(&Context::background(), args)
}

fn encoded(lines: &[&[&str]]) -> Vec<u8> {
    lines.iter().flat_map(|line| encode_command(line)).collect()
}

fn multi(items: &[String]) -> Reply {
    Reply::MultiBulk(items.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())).collect())
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_rewrite_compacts_log() {
    let (temp_dir, engine) = setup_temp_engine();
    for _ in 0..200 {
        exec(&engine, &["INCR", "n"]);
    }
    for i in 0..50 {
        exec(&engine, &["RPUSH", "l", &i.to_string()]);
        exec(&engine, &["LPOP", "l"]);
    }
    let size_before = engine.aof_size().unwrap();

    let stats = engine.rewrite_aof().unwrap();

    assert_eq!(stats.base_len, size_before);
    assert_eq!(stats.tail_len, 0);
    assert_eq!(stats.keys, 1);
    assert_eq!(engine.aof_size().unwrap(), stats.final_len());
    assert_eq!(
        fs::read(temp_dir.path().join("appendonly.aof")).unwrap(),
        encoded(&[&["set", "n", "200"]])
    );
}

#[test]
fn test_rewrite_output_per_value_type() {
    let (temp_dir, engine) = setup_temp_engine();
    exec(&engine, &["RPUSH", "b_list", "x", "y"]);
    exec(&engine, &["LPUSH", "b_list", "w"]);
    exec(&engine, &["SET", "a_str", "1"]);
    exec(&engine, &["HSET", "c_hash", "g", "2", "f", "1"]);
    exec(&engine, &["SADD", "d_set", "n", "m"]);

    engine.rewrite_aof().unwrap();

    assert_eq!(
        fs::read(temp_dir.path().join("appendonly.aof")).unwrap(),
        encoded(&[
            &["set", "a_str", "1"],
            &["rpush", "b_list", "w", "x", "y"],
            &["hset", "c_hash", "f", "1", "g", "2"],
            &["sadd", "d_set", "m", "n"],
        ])
    );
}

#[test]
fn test_rewrite_empty_store() {
    let (_temp, engine) = setup_temp_engine();
    exec(&engine, &["SET", "k", "v"]);
    exec(&engine, &["DEL", "k"]);

    let stats = engine.rewrite_aof().unwrap();

    assert_eq!(stats.keys, 0);
    assert_eq!(engine.aof_size().unwrap(), 0);
}

#[test]
fn test_appends_continue_after_rewrite() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        exec(&engine, &["RPUSH", "l", "a"]);
        engine.rewrite_aof().unwrap();
        exec(&engine, &["RPUSH", "l", "b"]);
        engine.rewrite_aof().unwrap();
        exec(&engine, &["RPUSH", "l", "c"]);
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(
        exec(&engine, &["LRANGE", "l", "0", "-1"]),
        multi(&["a".into(), "b".into(), "c".into()])
    );
}

// =============================================================================
// Expiry Tests
// =============================================================================

#[test]
fn test_rewrite_keeps_expiry() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        exec(&engine, &["SET", "k", "v", "EX", "1000"]);
        engine.rewrite_aof().unwrap();

        let log = fs::read(temp_dir.path().join("appendonly.aof")).unwrap();
        let text = String::from_utf8_lossy(&log);
        assert!(text.contains("pexpireat"));
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    match exec(&engine, &["TTL", "k"]) {
        Reply::Integer(n) => assert!(n > 990 && n <= 1000),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_rewrite_drops_expired_keys() {
    let (temp_dir, engine) = setup_temp_engine();
    exec(&engine, &["SET", "live", "1"]);
    exec(&engine, &["SET", "dead", "1"]);
    let past = (now_ms() - 1000).to_string();
    exec(&engine, &["PEXPIREAT", "dead", &past]);

    engine.rewrite_aof().unwrap();

    assert_eq!(
        fs::read(temp_dir.path().join("appendonly.aof")).unwrap(),
        encoded(&[&["set", "live", "1"]])
    );
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_write_during_rewrite_is_kept() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Arc::new(Engine::open(config_for(&temp_dir)).unwrap());
        exec(&engine, &["RPUSH", "l", "a"]);
        exec(&engine, &["RPUSH", "l", "b"]);

        let writer = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                exec(&engine, &["RPUSH", "l", "c"]);
            })
        };
        engine.rewrite_aof().unwrap();
        writer.join().unwrap();

        assert_eq!(
            exec(&engine, &["LRANGE", "l", "0", "-1"]),
            multi(&["a".into(), "b".into(), "c".into()])
        );
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(
        exec(&engine, &["LRANGE", "l", "0", "-1"]),
        multi(&["a".into(), "b".into(), "c".into()])
    );
}

#[test]
fn test_write_after_rebuild_is_spliced_from_tail() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("appendonly.aof");
    let rpush = |v: &str| {
        vec![
            Bytes::from_static(b"rpush"),
            Bytes::from_static(b"l"),
            Bytes::copy_from_slice(v.as_bytes()),
        ]
    };
    {
        let aof = AofPersister::open(&path, AofSyncStrategy::EveryWrite, None).unwrap();
        aof.persist(&[rpush("a")]).unwrap();
        aof.persist(&[rpush("b")]).unwrap();
        let base = aof.size().unwrap();

        let stats = aof
            .rewrite_with(|| aof.persist(&[rpush("c")]).unwrap())
            .unwrap();

        let tail = encode_command(&rpush("c"));
        assert_eq!(stats.base_len, base);
        assert_eq!(stats.tail_len, tail.len() as u64);
        assert_eq!(stats.keys, 1);

        let mut expected = encode_command(&["rpush", "l", "a", "b"]);
        expected.extend(tail);
        assert_eq!(fs::read(&path).unwrap(), expected);
        aof.close().unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(
        exec(&engine, &["LRANGE", "l", "0", "-1"]),
        multi(&["a".into(), "b".into(), "c".into()])
    );
}

#[test]
fn test_huge_list_survives_rewrite_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .aof_sync_strategy(AofSyncStrategy::Never)
        .auto_rewrite_after(None)
        .build();
    let batch = 1000;
    let total = (DEFAULT_MAX_ARRAY_LEN / batch + 10) * batch;

    {
        let engine = Engine::open(config.clone()).unwrap();
        let values: Vec<String> = (0..batch).map(|i| i.to_string()).collect();
        let mut line: Vec<&str> = vec!["RPUSH", "big"];
        line.extend(values.iter().map(String::as_str));
        for _ in 0..total / batch {
            exec(&engine, &line);
        }
        assert_eq!(exec(&engine, &["LLEN", "big"]), Reply::Integer(total as i64));

        let first = engine.rewrite_aof().unwrap();
        assert_eq!(first.keys, 1);
        // A second rewrite replays the output of the first
        engine.rewrite_aof().unwrap();
    }

    let log = fs::read(temp_dir.path().join("appendonly.aof")).unwrap();
    let header = format!("*{}\r\n", ITEMS_PER_CMD + 2);
    assert!(log.starts_with(header.as_bytes()));

    let engine = Engine::open(config).unwrap();
    assert_eq!(exec(&engine, &["LLEN", "big"]), Reply::Integer(total as i64));
    assert_eq!(
        exec(&engine, &["LRANGE", "big", "0", "0"]),
        multi(&["0".into()])
    );
}

#[test]
fn test_many_writes_racing_rewrite() {
    let temp_dir = TempDir::new().unwrap();
    let total = 500;
    {
        let engine = Arc::new(Engine::open(config_for(&temp_dir)).unwrap());
        for i in 0..100 {
            exec(&engine, &["RPUSH", "l", &i.to_string()]);
        }

        let writer = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 100..total {
                    exec(&engine, &["RPUSH", "l", &i.to_string()]);
                }
            })
        };
        for _ in 0..3 {
            engine.rewrite_aof().unwrap();
        }
        writer.join().unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    let expected: Vec<String> = (0..total).map(|i| i.to_string()).collect();
    assert_eq!(exec(&engine, &["LRANGE", "l", "0", "-1"]), multi(&expected));
}

#[test]
fn test_concurrent_rewrites_are_exclusive() {
    let temp_dir = TempDir::new().unwrap();
    let aof = AofPersister::open(
        &temp_dir.path().join("test.aof"),
        AofSyncStrategy::Never,
        None,
    )
    .unwrap();
    for i in 0..2000 {
        let key = Bytes::from(format!("key{}", i % 100));
        aof.persist(&[vec![Bytes::from_static(b"set"), key, Bytes::from(i.to_string())]])
            .unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let aof = Arc::clone(&aof);
            thread::spawn(move || aof.rewrite())
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => succeeded += 1,
            Err(KvError::RewriteInProgress) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert!(succeeded >= 1);

    let expected: usize = (1900..2000)
        .map(|i| {
            encode_command(&[
                "set".to_string(),
                format!("key{}", i % 100),
                i.to_string(),
            ])
            .len()
        })
        .sum();
    assert_eq!(aof.size().unwrap() as usize, expected);
}

// =============================================================================
// Auto Rewrite Tests
// =============================================================================

#[test]
fn test_auto_rewrite_after_threshold() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .aof_sync_strategy(AofSyncStrategy::EveryWrite)
        .auto_rewrite_after(Some(50))
        .build();

    {
        let engine = Engine::open(config.clone()).unwrap();
        for _ in 0..60 {
            exec(&engine, &["INCR", "n"]);
        }
        let full_len = 60 * encode_command(&["incr", "n"]).len() as u64;

        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.aof_size().unwrap() >= full_len && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(engine.aof_size().unwrap() < full_len);
    }

    let engine = Engine::open(config).unwrap();
    assert_eq!(exec(&engine, &["GET", "n"]), Reply::Bulk(Bytes::from_static(b"60")));
}
