//! Tests for Engine
//!
//! These tests verify:
//! - Engine lifecycle (open/close)
//! - State survives a restart through the log
//! - Reload is idempotent
//! - Partial trailing commands are tolerated
//! - Running without a log

use std::fs::OpenOptions;
use std::io::Write;
use std::thread;

use aofkv::config::{AofSyncStrategy, Config};
use aofkv::dispatch::Context;
use aofkv::engine::Engine;
use aofkv::error::KvError;
use aofkv::protocol::Reply;
use bytes::Bytes;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .aof_sync_strategy(AofSyncStrategy::EveryWrite) // Sync every write for test reliability
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

fn bulk(s: &str) -> Reply {
    Reply::Bulk(Bytes::copy_from_slice(s.as_bytes()))
}

fn multi(items: &[&str]) -> Reply {
    Reply::MultiBulk(items.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())).collect())
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_engine_open_creates_directory_and_log() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let config = Config::builder().data_dir(&data_dir).build();
    let engine = Engine::open(config).unwrap();

    assert!(data_dir.exists());
    assert!(data_dir.join("appendonly.aof").exists());
    assert_eq!(engine.aof_path(), Some(data_dir.join("appendonly.aof")));
}

#[test]
fn test_engine_close_is_idempotent() {
    let (_temp, engine) = setup_temp_engine();

    engine.close().unwrap();
    engine.close().unwrap();

    assert!(exec(&engine, &["PING"]).is_error());
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        exec(&engine, &["SET", "s", "hello"]);
        exec(&engine, &["RPUSH", "l", "a", "b"]);
        exec(&engine, &["LPUSH", "l", "c"]);
        exec(&engine, &["HSET", "h", "f", "v"]);
        exec(&engine, &["SADD", "z", "m1", "m2"]);
        exec(&engine, &["INCRBY", "n", "41"]);
        exec(&engine, &["INCR", "n"]);
        exec(&engine, &["SET", "gone", "x"]);
        exec(&engine, &["DEL", "gone"]);
        engine.close().unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(exec(&engine, &["GET", "s"]), bulk("hello"));
    assert_eq!(exec(&engine, &["LRANGE", "l", "0", "-1"]), multi(&["c", "a", "b"]));
    assert_eq!(exec(&engine, &["HGET", "h", "f"]), bulk("v"));
    assert_eq!(exec(&engine, &["SMEMBERS", "z"]), multi(&["m1", "m2"]));
    assert_eq!(exec(&engine, &["GET", "n"]), bulk("42"));
    assert_eq!(exec(&engine, &["EXISTS", "gone"]), Reply::Integer(0));
}

#[test]
fn test_reload_does_not_grow_log() {
    let temp_dir = TempDir::new().unwrap();

    let size_before = {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        exec(&engine, &["SET", "a", "1"]);
        exec(&engine, &["RPUSH", "l", "x"]);
        engine.aof_size().unwrap()
    };

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(engine.aof_size().unwrap(), size_before);
    assert_eq!(exec(&engine, &["GET", "a"]), bulk("1"));
}

#[test]
fn test_reload_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        for i in 0..50 {
            exec(&engine, &["RPUSH", "l", &i.to_string()]);
            if i % 7 == 0 {
                exec(&engine, &["LPOP", "l"]);
            }
        }
        exec(&engine, &["HSET", "h", "a", "1", "b", "2"]);
    }

    let first = Engine::open(config_for(&temp_dir)).unwrap();
    let first_store = first.handler().gateway().close().unwrap();
    drop(first);
    let second = Engine::open(config_for(&temp_dir)).unwrap();
    let second_store = second.handler().gateway().close().unwrap();

    assert_eq!(first_store.to_cmds(), second_store.to_cmds());
    assert!(!first_store.is_empty());
}

#[test]
fn test_expiry_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        exec(&engine, &["SET", "short", "v", "PX", "1"]);
        exec(&engine, &["SET", "long", "v", "EX", "1000"]);
    }
    thread::sleep(std::time::Duration::from_millis(20));

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(exec(&engine, &["GET", "short"]), Reply::Null);
    assert_eq!(exec(&engine, &["GET", "long"]), bulk("v"));
    match exec(&engine, &["TTL", "long"]) {
        Reply::Integer(n) => assert!(n > 990 && n <= 1000),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_partial_trailing_command_is_ignored() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        exec(&engine, &["SET", "a", "1"]);
    }
    let aof_path = temp_dir.path().join("appendonly.aof");
    let mut file = OpenOptions::new().append(true).open(&aof_path).unwrap();
    file.write_all(b"*3\r\n$3\r\nset\r\n$1\r\nb").unwrap();
    drop(file);

    {
        let engine = Engine::open(config_for(&temp_dir)).unwrap();
        assert_eq!(exec(&engine, &["GET", "a"]), bulk("1"));
        assert_eq!(exec(&engine, &["GET", "b"]), Reply::Null);
        exec(&engine, &["SET", "c", "3"]);
    }

    // Appends after the cut must still replay
    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(exec(&engine, &["GET", "a"]), bulk("1"));
    assert_eq!(exec(&engine, &["GET", "c"]), bulk("3"));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_all_persisted() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = std::sync::Arc::new(Engine::open(config_for(&temp_dir)).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let engine = std::sync::Arc::clone(&engine);
                thread::spawn(move || {
                    for i in 0..25 {
                        exec(&engine, &["RPUSH", "shared", &format!("{}-{}", t, i)]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    let engine = Engine::open(config_for(&temp_dir)).unwrap();
    assert_eq!(exec(&engine, &["LLEN", "shared"]), Reply::Integer(100));
}

// =============================================================================
// No-AOF Tests
// =============================================================================

#[test]
fn test_engine_without_aof() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .append_only(false)
        .build();

    {
        let engine = Engine::open(config.clone()).unwrap();
        assert_eq!(exec(&engine, &["SET", "k", "v"]), Reply::ok());
        assert_eq!(engine.aof_path(), None);
        assert!(matches!(engine.rewrite_aof(), Err(KvError::Config(_))));
    }

    let engine = Engine::open(config).unwrap();
    assert_eq!(exec(&engine, &["GET", "k"]), Reply::Null);
    assert!(!temp_dir.path().join("appendonly.aof").exists());
}
