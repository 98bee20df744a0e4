//! Command definitions
//!
//! The fixed command registry and the per-request `Command` record.

use bytes::Bytes;
use crossbeam::channel::Sender;

use super::Context;
use crate::protocol::Reply;

/// Every command the executor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmdType {
    Ping,
    // strings
    Get,
    Set,
    SetNx,
    MSet,
    MGet,
    Incr,
    IncrBy,
    Decr,
    DecrBy,
    // keyspace
    Del,
    Exists,
    Type,
    Expire,
    ExpireAt,
    PExpireAt,
    Persist,
    Ttl,
    PTtl,
    // lists
    LPush,
    RPush,
    LPop,
    RPop,
    LLen,
    LRange,
    // hashes
    HSet,
    HGet,
    HDel,
    HGetAll,
    HLen,
    // sets
    SAdd,
    SRem,
    SMembers,
    SIsMember,
    SCard,
}

/// Argument count constraint, counting the command name itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Arity::Exact(n) => argc == n,
            Arity::AtLeast(n) => argc >= n,
            Arity::Between(lo, hi) => (lo..=hi).contains(&argc),
        }
    }
}

/// Registry entry
#[derive(Debug, Clone, Copy)]
pub struct CmdSpec {
    pub cmd: CmdType,
    /// Lowercase canonical name (also the name written to the log)
    pub name: &'static str,
    pub arity: Arity,
    /// Whether a successful execution changes the store
    pub mutating: bool,
}

const fn spec(cmd: CmdType, name: &'static str, arity: Arity, mutating: bool) -> CmdSpec {
    CmdSpec { cmd, name, arity, mutating }
}

use Arity::{AtLeast, Between, Exact};

/// The command table
pub const REGISTRY: &[CmdSpec] = &[
    spec(CmdType::Ping, "ping", Between(1, 2), false),
    spec(CmdType::Get, "get", Exact(2), false),
    spec(CmdType::Set, "set", AtLeast(3), true),
    spec(CmdType::SetNx, "setnx", Exact(3), true),
    spec(CmdType::MSet, "mset", AtLeast(3), true),
    spec(CmdType::MGet, "mget", AtLeast(2), false),
    spec(CmdType::Incr, "incr", Exact(2), true),
    spec(CmdType::IncrBy, "incrby", Exact(3), true),
    spec(CmdType::Decr, "decr", Exact(2), true),
    spec(CmdType::DecrBy, "decrby", Exact(3), true),
    spec(CmdType::Del, "del", AtLeast(2), true),
    spec(CmdType::Exists, "exists", AtLeast(2), false),
    spec(CmdType::Type, "type", Exact(2), false),
    spec(CmdType::Expire, "expire", Exact(3), true),
    spec(CmdType::ExpireAt, "expireat", Exact(3), true),
    spec(CmdType::PExpireAt, "pexpireat", Exact(3), true),
    spec(CmdType::Persist, "persist", Exact(2), true),
    spec(CmdType::Ttl, "ttl", Exact(2), false),
    spec(CmdType::PTtl, "pttl", Exact(2), false),
    spec(CmdType::LPush, "lpush", AtLeast(3), true),
    spec(CmdType::RPush, "rpush", AtLeast(3), true),
    spec(CmdType::LPop, "lpop", Between(2, 3), true),
    spec(CmdType::RPop, "rpop", Between(2, 3), true),
    spec(CmdType::LLen, "llen", Exact(2), false),
    spec(CmdType::LRange, "lrange", Exact(4), false),
    spec(CmdType::HSet, "hset", AtLeast(4), true),
    spec(CmdType::HGet, "hget", Exact(3), false),
    spec(CmdType::HDel, "hdel", AtLeast(3), true),
    spec(CmdType::HGetAll, "hgetall", Exact(2), false),
    spec(CmdType::HLen, "hlen", Exact(2), false),
    spec(CmdType::SAdd, "sadd", AtLeast(3), true),
    spec(CmdType::SRem, "srem", AtLeast(3), true),
    spec(CmdType::SMembers, "smembers", Exact(2), false),
    spec(CmdType::SIsMember, "sismember", Exact(3), false),
    spec(CmdType::SCard, "scard", Exact(2), false),
];

impl CmdType {
    /// Case-insensitive registry lookup
    pub fn lookup(name: &[u8]) -> Option<&'static CmdSpec> {
        REGISTRY
            .iter()
            .find(|spec| spec.name.as_bytes().eq_ignore_ascii_case(name))
    }

    pub fn spec(self) -> &'static CmdSpec {
        REGISTRY
            .iter()
            .find(|spec| spec.cmd == self)
            .unwrap_or(&REGISTRY[0])
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn is_mutating(self) -> bool {
        self.spec().mutating
    }
}

/// Registry membership test
pub fn valid_command(name: &[u8]) -> bool {
    CmdType::lookup(name).is_some()
}

/// One request in flight to the executor
///
/// Consumed exactly once: the executor answers on `receiver` and drops it.
pub struct Command {
    pub(crate) ctx: Context,
    pub(crate) cmd: CmdType,
    /// Arguments after the command name
    pub(crate) args: Vec<Bytes>,
    pub(crate) receiver: Sender<Reply>,
}

impl Command {
    pub fn new(ctx: Context, cmd: CmdType, args: Vec<Bytes>, receiver: Sender<Reply>) -> Self {
        Self { ctx, cmd, args, receiver }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("cmd", &self.cmd)
            .field("argc", &self.args.len())
            .finish()
    }
}
