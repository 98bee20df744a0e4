//! Store Module
//!
//! In-memory keyspace owned by exactly one executor thread.
//!
//! ## Responsibilities
//! - Key → value and key → absolute expiry mappings
//! - Lazy expiry: an expired key is removed the next time it is touched
//! - Command handlers that report which commands must be logged
//! - Expiry-filtered iteration for log rewrites
//!
//! ## Concurrency
//! `DataStore` has no internal locking. It is moved into an
//! [`Executor`](crate::dispatch::Executor) and only ever touched from that
//! executor's thread.

mod commands;
mod entity;
mod list;

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

pub use commands::Applied;
pub use entity::{HashEntity, SetEntity, StringEntity, Value};
pub use list::{ListEntity, DEFAULT_CAP, ITEMS_PER_CMD, MAX_CAP};

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The keyspace
#[derive(Debug, Clone)]
pub struct DataStore {
    data: HashMap<Bytes, Value>,
    /// Absolute expiry, Unix milliseconds
    expire_at: HashMap<Bytes, u64>,
    list_max_cap: usize,
}

impl DataStore {
    pub fn new() -> Self {
        Self::with_list_max_cap(MAX_CAP)
    }

    /// Store whose lists refuse to grow past `max_cap` elements
    pub fn with_list_max_cap(max_cap: usize) -> Self {
        Self {
            data: HashMap::new(),
            expire_at: HashMap::new(),
            list_max_cap: max_cap,
        }
    }

    /// Number of physically present keys (expired ones included)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn is_expired(&self, key: &[u8], now: u64) -> bool {
        self.expire_at.get(key).is_some_and(|&at| at <= now)
    }

    /// Drop `key` if its expiry has passed. Returns whether it was dropped.
    fn expire_if_needed(&mut self, key: &[u8]) -> bool {
        if self.is_expired(key, now_ms()) {
            self.data.remove(key);
            self.expire_at.remove(key);
            return true;
        }
        false
    }

    /// Live value for `key`, after lazy expiry
    pub(crate) fn get(&mut self, key: &[u8]) -> Option<&Value> {
        self.expire_if_needed(key);
        self.data.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.expire_if_needed(key);
        self.data.get_mut(key)
    }

    /// Insert or replace a value, keeping any existing expiry
    pub(crate) fn put(&mut self, key: Bytes, value: Value) {
        self.data.insert(key, value);
    }

    /// Remove a key and its expiry. Returns whether a live key was removed.
    pub(crate) fn remove(&mut self, key: &[u8]) -> bool {
        let expired = self.expire_if_needed(key);
        self.expire_at.remove(key);
        !expired && self.data.remove(key).is_some()
    }

    pub(crate) fn set_expire_at(&mut self, key: &[u8], at_ms: u64) -> bool {
        if self.get(key).is_none() {
            return false;
        }
        self.expire_at.insert(Bytes::copy_from_slice(key), at_ms);
        true
    }

    pub(crate) fn clear_expire(&mut self, key: &[u8]) -> bool {
        self.expire_at.remove(key).is_some()
    }

    /// Expiry of a live key, Unix milliseconds
    pub fn expire_at(&self, key: &[u8]) -> Option<u64> {
        self.expire_at.get(key).copied()
    }

    /// Visit every live key in key order with its value and expiry
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Bytes, &Value, Option<u64>),
    {
        let now = now_ms();
        let mut keys: Vec<&Bytes> = self
            .data
            .keys()
            .filter(|key| !self.is_expired(key, now))
            .collect();
        keys.sort();
        for key in keys {
            if let Some(value) = self.data.get(key) {
                f(key, value, self.expire_at.get(key).copied());
            }
        }
    }

    /// Visit the reconstruction commands of every live key, in key order.
    /// A key's `PEXPIREAT` follows its value commands.
    pub fn for_each_cmds<F>(&self, mut f: F)
    where
        F: FnMut(&Bytes, Vec<Vec<Bytes>>),
    {
        self.for_each(|key, value, expire_at| {
            let mut cmds = value.to_cmds();
            if let Some(at) = expire_at {
                cmds.push(pexpireat_cmd(key, at));
            }
            f(key, cmds);
        });
    }

    /// Reconstruction commands for the whole store, in key order
    pub fn to_cmds(&self) -> Vec<Vec<Bytes>> {
        let mut all = Vec::with_capacity(self.data.len());
        self.for_each_cmds(|_, cmds| all.extend(cmds));
        all
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Synthetic absolute-expiry command: `PEXPIREAT key <unix-ms>`
pub fn pexpireat_cmd(key: &Bytes, at_ms: u64) -> Vec<Bytes> {
    vec![
        Bytes::from_static(b"pexpireat"),
        key.clone(),
        Bytes::from(at_ms.to_string()),
    ]
}
