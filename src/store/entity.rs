//! Value variants
//!
//! Every value knows its key and can reduce itself to the commands that
//! rebuild it from an empty store.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;

use super::list::{batched_cmds, ListEntity, ITEMS_PER_CMD};

/// A plain string value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringEntity {
    key: Bytes,
    value: Bytes,
}

impl StringEntity {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn set(&mut self, value: Bytes) {
        self.value = value;
    }

    /// `SET key value`
    pub fn to_cmds(&self) -> Vec<Vec<Bytes>> {
        vec![vec![Bytes::from_static(b"set"), self.key.clone(), self.value.clone()]]
    }
}

/// Field → value map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEntity {
    key: Bytes,
    fields: BTreeMap<Bytes, Bytes>,
}

impl HashEntity {
    pub fn new(key: Bytes) -> Self {
        Self { key, fields: BTreeMap::new() }
    }

    /// Returns `true` if the field is new
    pub fn insert(&mut self, field: Bytes, value: Bytes) -> bool {
        self.fields.insert(field, value).is_none()
    }

    pub fn get(&self, field: &[u8]) -> Option<&Bytes> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &[u8]) -> bool {
        self.fields.remove(field).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields and values interleaved, in field order
    pub fn flatten(&self) -> Vec<Bytes> {
        self.fields
            .iter()
            .flat_map(|(f, v)| [f.clone(), v.clone()])
            .collect()
    }

    /// `HSET key f1 v1 f2 v2 ...`, at most `ITEMS_PER_CMD` pairs each
    pub fn to_cmds(&self) -> Vec<Vec<Bytes>> {
        batched_cmds(b"hset", &self.key, &self.flatten(), ITEMS_PER_CMD * 2)
    }
}

/// Unordered set of members (kept sorted for deterministic output)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEntity {
    key: Bytes,
    members: BTreeSet<Bytes>,
}

impl SetEntity {
    pub fn new(key: Bytes) -> Self {
        Self { key, members: BTreeSet::new() }
    }

    pub fn insert(&mut self, member: Bytes) -> bool {
        self.members.insert(member)
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.members.remove(member)
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.members.contains(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> Vec<Bytes> {
        self.members.iter().cloned().collect()
    }

    /// `SADD key m1 m2 ...`, at most `ITEMS_PER_CMD` members each
    pub fn to_cmds(&self) -> Vec<Vec<Bytes>> {
        batched_cmds(b"sadd", &self.key, &self.members(), ITEMS_PER_CMD)
    }
}

/// Closed set of value types held by the store
#[derive(Debug, Clone)]
pub enum Value {
    String(StringEntity),
    List(ListEntity),
    Hash(HashEntity),
    Set(SetEntity),
}

impl Value {
    /// Name reported by `TYPE`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
        }
    }

    /// Commands that rebuild this value from empty state
    pub fn to_cmds(&self) -> Vec<Vec<Bytes>> {
        match self {
            Value::String(s) => s.to_cmds(),
            Value::List(l) => l.to_cmds(),
            Value::Hash(h) => h.to_cmds(),
            Value::Set(s) => s.to_cmds(),
        }
    }
}
