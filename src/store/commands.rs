//! Command handlers
//!
//! Each handler applies one command to the store and reports the reply plus
//! the commands that must be appended to the log. Handlers that fail leave
//! the store untouched.

use bytes::Bytes;

use super::entity::{HashEntity, SetEntity, StringEntity, Value};
use super::list::ListEntity;
use super::{now_ms, pexpireat_cmd, DataStore};
use crate::dispatch::CmdType;
use crate::error::{KvError, Result};
use crate::protocol::Reply;

/// Outcome of applying one command
#[derive(Debug)]
pub struct Applied {
    pub reply: Reply,
    /// Commands to append to the log, in order (empty for reads and no-ops)
    pub log: Vec<Vec<Bytes>>,
}

impl Applied {
    fn read(reply: Reply) -> Self {
        Self { reply, log: Vec::new() }
    }

    fn write(reply: Reply, cmd: Vec<Bytes>) -> Self {
        Self { reply, log: vec![cmd] }
    }
}

/// `name arg0 arg1 ...` as it should appear in the log
fn cmd_line(cmd: CmdType, args: &[Bytes]) -> Vec<Bytes> {
    let mut line = Vec::with_capacity(1 + args.len());
    line.push(Bytes::from_static(cmd.name().as_bytes()));
    line.extend(args.iter().cloned());
    line
}

fn parse_i64(raw: &[u8]) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(KvError::NotInteger)
}

fn parse_count(raw: &[u8]) -> Result<usize> {
    let n = parse_i64(raw)?;
    usize::try_from(n).map_err(|_| KvError::NotInteger)
}

impl DataStore {
    /// Apply one command. `args` excludes the command name.
    pub fn apply(&mut self, cmd: CmdType, args: &[Bytes]) -> Applied {
        let result = match cmd {
            CmdType::Ping => Ok(Applied::read(match args.first() {
                Some(msg) => Reply::Bulk(msg.clone()),
                None => Reply::Status("PONG".to_string()),
            })),
            CmdType::Get => self.cmd_get(args),
            CmdType::Set => self.cmd_set(args),
            CmdType::SetNx => self.cmd_setnx(args),
            CmdType::MSet => self.cmd_mset(args),
            CmdType::MGet => self.cmd_mget(args),
            CmdType::Incr => self.cmd_incr_by(cmd, args, 1),
            CmdType::Decr => self.cmd_incr_by(cmd, args, -1),
            CmdType::IncrBy => parse_i64(&args[1]).and_then(|d| self.cmd_incr_by(cmd, args, d)),
            CmdType::DecrBy => parse_i64(&args[1])
                .and_then(|d| d.checked_neg().ok_or(KvError::NotInteger))
                .and_then(|d| self.cmd_incr_by(cmd, args, d)),
            CmdType::Del => self.cmd_del(args),
            CmdType::Exists => self.cmd_exists(args),
            CmdType::Type => self.cmd_type(args),
            CmdType::Expire => parse_i64(&args[1]).map(|secs| {
                let at = (now_ms() as i64).saturating_add(secs.saturating_mul(1000));
                self.expire_at_ms(&args[0], at)
            }),
            CmdType::ExpireAt => parse_i64(&args[1])
                .map(|secs| self.expire_at_ms(&args[0], secs.saturating_mul(1000))),
            CmdType::PExpireAt => parse_i64(&args[1]).map(|ms| self.expire_at_ms(&args[0], ms)),
            CmdType::Persist => self.cmd_persist(args),
            CmdType::Ttl => Ok(self.cmd_ttl(args, 1000)),
            CmdType::PTtl => Ok(self.cmd_ttl(args, 1)),
            CmdType::LPush => self.cmd_push(cmd, args, true),
            CmdType::RPush => self.cmd_push(cmd, args, false),
            CmdType::LPop => self.cmd_pop(cmd, args, true),
            CmdType::RPop => self.cmd_pop(cmd, args, false),
            CmdType::LLen => self.cmd_llen(args),
            CmdType::LRange => self.cmd_lrange(args),
            CmdType::HSet => self.cmd_hset(cmd, args),
            CmdType::HGet => self.cmd_hget(args),
            CmdType::HDel => self.cmd_hdel(args),
            CmdType::HGetAll => self.hash_mut(&args[0]).map(|h| {
                Applied::read(Reply::MultiBulk(h.map(|h| h.flatten()).unwrap_or_default()))
            }),
            CmdType::HLen => self.hash_mut(&args[0]).map(|h| {
                Applied::read(Reply::Integer(h.map_or(0, |h| h.len() as i64)))
            }),
            CmdType::SAdd => self.cmd_sadd(cmd, args),
            CmdType::SRem => self.cmd_srem(args),
            CmdType::SMembers => self.set_mut(&args[0]).map(|s| {
                Applied::read(Reply::MultiBulk(s.map(|s| s.members()).unwrap_or_default()))
            }),
            CmdType::SIsMember => self.set_mut(&args[0]).map(|s| {
                Applied::read(Reply::Integer(s.is_some_and(|s| s.contains(&args[1])) as i64))
            }),
            CmdType::SCard => self.set_mut(&args[0]).map(|s| {
                Applied::read(Reply::Integer(s.map_or(0, |s| s.len() as i64)))
            }),
        };
        result.unwrap_or_else(|err| Applied::read(Reply::from(&err)))
    }

    // =========================================================================
    // Typed lookups
    // =========================================================================

    fn string_value(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.value().clone())),
            Some(_) => Err(KvError::WrongType),
        }
    }

    fn list_mut(&mut self, key: &[u8]) -> Result<Option<&mut ListEntity>> {
        match self.get_mut(key) {
            None => Ok(None),
            Some(Value::List(l)) => Ok(Some(l)),
            Some(_) => Err(KvError::WrongType),
        }
    }

    fn hash_mut(&mut self, key: &[u8]) -> Result<Option<&mut HashEntity>> {
        match self.get_mut(key) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(KvError::WrongType),
        }
    }

    fn set_mut(&mut self, key: &[u8]) -> Result<Option<&mut SetEntity>> {
        match self.get_mut(key) {
            None => Ok(None),
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(_) => Err(KvError::WrongType),
        }
    }

    /// Replace `key` with a string value and drop any expiry
    fn put_string(&mut self, key: &Bytes, value: Bytes) {
        self.put(key.clone(), Value::String(StringEntity::new(key.clone(), value)));
        self.clear_expire(key);
    }

    // =========================================================================
    // Strings
    // =========================================================================

    fn cmd_get(&mut self, args: &[Bytes]) -> Result<Applied> {
        let value = self.string_value(&args[0])?;
        Ok(Applied::read(value.map_or(Reply::Null, Reply::Bulk)))
    }

    fn cmd_set(&mut self, args: &[Bytes]) -> Result<Applied> {
        let (key, value) = (&args[0], &args[1]);
        let mut ttl_ms: Option<i64> = None;
        let mut nx = false;

        let mut opts = args[2..].iter();
        while let Some(opt) = opts.next() {
            if opt.eq_ignore_ascii_case(b"nx") {
                nx = true;
            } else if opt.eq_ignore_ascii_case(b"ex") || opt.eq_ignore_ascii_case(b"px") {
                if ttl_ms.is_some() {
                    return Err(KvError::Syntax);
                }
                let amount = parse_i64(opts.next().ok_or(KvError::Syntax)?)?;
                if amount <= 0 {
                    return Ok(Applied::read(Reply::error("invalid expire time in 'set' command")));
                }
                let scale = if opt.eq_ignore_ascii_case(b"ex") { 1000 } else { 1 };
                ttl_ms = Some(amount.saturating_mul(scale));
            } else {
                return Err(KvError::Syntax);
            }
        }

        if nx && self.get(key).is_some() {
            return Ok(Applied::read(Reply::Null));
        }

        self.put_string(key, value.clone());
        let mut log = vec![vec![Bytes::from_static(b"set"), key.clone(), value.clone()]];
        if let Some(ttl) = ttl_ms {
            let at = (now_ms() as i64).saturating_add(ttl).max(0) as u64;
            self.set_expire_at(key, at);
            log.push(pexpireat_cmd(key, at));
        }
        Ok(Applied { reply: Reply::ok(), log })
    }

    fn cmd_setnx(&mut self, args: &[Bytes]) -> Result<Applied> {
        let (key, value) = (&args[0], &args[1]);
        if self.get(key).is_some() {
            return Ok(Applied::read(Reply::Integer(0)));
        }
        self.put_string(key, value.clone());
        Ok(Applied::write(
            Reply::Integer(1),
            vec![Bytes::from_static(b"set"), key.clone(), value.clone()],
        ))
    }

    fn cmd_mset(&mut self, args: &[Bytes]) -> Result<Applied> {
        if args.len() % 2 != 0 {
            return Err(KvError::WrongArity("mset".to_string()));
        }
        for pair in args.chunks_exact(2) {
            self.put_string(&pair[0], pair[1].clone());
        }
        Ok(Applied::write(Reply::ok(), cmd_line(CmdType::MSet, args)))
    }

    fn cmd_mget(&mut self, args: &[Bytes]) -> Result<Applied> {
        let values = args
            .iter()
            .map(|key| match self.string_value(key) {
                Ok(Some(v)) => Reply::Bulk(v),
                _ => Reply::Null,
            })
            .collect();
        Ok(Applied::read(Reply::Array(values)))
    }

    fn cmd_incr_by(&mut self, cmd: CmdType, args: &[Bytes], delta: i64) -> Result<Applied> {
        let key = &args[0];
        let current = match self.string_value(key)? {
            Some(raw) => parse_i64(&raw)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(KvError::NotInteger)?;
        let value = Bytes::from(next.to_string());
        match self.get_mut(key) {
            Some(Value::String(s)) => s.set(value),
            _ => self.put(key.clone(), Value::String(StringEntity::new(key.clone(), value))),
        }
        Ok(Applied::write(Reply::Integer(next), cmd_line(cmd, args)))
    }

    // =========================================================================
    // Keyspace
    // =========================================================================

    fn cmd_del(&mut self, args: &[Bytes]) -> Result<Applied> {
        let removed: Vec<Bytes> = args.iter().filter(|key| self.remove(key)).cloned().collect();
        if removed.is_empty() {
            return Ok(Applied::read(Reply::Integer(0)));
        }
        Ok(Applied::write(
            Reply::Integer(removed.len() as i64),
            cmd_line(CmdType::Del, &removed),
        ))
    }

    fn cmd_exists(&mut self, args: &[Bytes]) -> Result<Applied> {
        let count = args.iter().filter(|key| self.get(key).is_some()).count();
        Ok(Applied::read(Reply::Integer(count as i64)))
    }

    fn cmd_type(&mut self, args: &[Bytes]) -> Result<Applied> {
        let name = self.get(&args[0]).map_or("none", Value::type_name);
        Ok(Applied::read(Reply::Status(name.to_string())))
    }

    fn expire_at_ms(&mut self, key: &Bytes, at_ms: i64) -> Applied {
        let at = at_ms.max(0) as u64;
        if !self.set_expire_at(key, at) {
            return Applied::read(Reply::Integer(0));
        }
        Applied::write(Reply::Integer(1), pexpireat_cmd(key, at))
    }

    fn cmd_persist(&mut self, args: &[Bytes]) -> Result<Applied> {
        let key = &args[0];
        if self.get(key).is_none() || !self.clear_expire(key) {
            return Ok(Applied::read(Reply::Integer(0)));
        }
        Ok(Applied::write(Reply::Integer(1), cmd_line(CmdType::Persist, args)))
    }

    fn cmd_ttl(&mut self, args: &[Bytes], unit_ms: u64) -> Applied {
        let key = &args[0];
        if self.get(key).is_none() {
            return Applied::read(Reply::Integer(-2));
        }
        let reply = match self.expire_at(key) {
            None => Reply::Integer(-1),
            Some(at) => {
                let remaining = at.saturating_sub(now_ms());
                Reply::Integer(((remaining + unit_ms / 2) / unit_ms) as i64)
            }
        };
        Applied::read(reply)
    }

    // =========================================================================
    // Lists
    // =========================================================================

    fn cmd_push(&mut self, cmd: CmdType, args: &[Bytes], left: bool) -> Result<Applied> {
        let key = &args[0];
        let values = &args[1..];
        let max_cap = self.list_max_cap;

        if self.list_mut(key)?.is_none() {
            let list = ListEntity::with_limits(key.clone(), Vec::new(), max_cap)?;
            self.put(key.clone(), Value::List(list));
        }
        let list = self.list_mut(key)?.ok_or(KvError::WrongType)?;
        if !list.can_hold(values.len()) {
            let err = KvError::CapacityExceeded { max: max_cap };
            if list.is_empty() {
                self.remove(key);
            }
            return Err(err);
        }
        for value in values {
            if left {
                list.push_left(value.clone())?;
            } else {
                list.push_right(value.clone())?;
            }
        }
        let len = list.len() as i64;
        Ok(Applied::write(Reply::Integer(len), cmd_line(cmd, args)))
    }

    fn cmd_pop(&mut self, cmd: CmdType, args: &[Bytes], left: bool) -> Result<Applied> {
        let key = &args[0];
        let count = args.get(1).map(|raw| parse_count(raw)).transpose()?;
        let n = count.unwrap_or(1);

        let (popped, emptied) = match self.list_mut(key)? {
            None => return Ok(Applied::read(Reply::Null)),
            Some(list) => {
                let popped = if left { list.pop_left(n) } else { list.pop_right(n) };
                (popped, list.is_empty())
            }
        };
        let Some(popped) = popped else {
            return Ok(Applied::read(Reply::Null));
        };
        if n == 0 {
            return Ok(Applied::read(Reply::MultiBulk(Vec::new())));
        }
        if emptied {
            self.remove(key);
        }

        let reply = match count {
            Some(_) => Reply::MultiBulk(popped),
            None => popped.into_iter().next().map_or(Reply::Null, Reply::Bulk),
        };
        Ok(Applied::write(reply, cmd_line(cmd, args)))
    }

    fn cmd_llen(&mut self, args: &[Bytes]) -> Result<Applied> {
        let len = self.list_mut(&args[0])?.map_or(0, |l| l.len());
        Ok(Applied::read(Reply::Integer(len as i64)))
    }

    fn cmd_lrange(&mut self, args: &[Bytes]) -> Result<Applied> {
        let start = parse_i64(&args[1])?;
        let stop = parse_i64(&args[2])?;
        let items = self
            .list_mut(&args[0])?
            .and_then(|l| l.range(start, stop))
            .unwrap_or_default();
        Ok(Applied::read(Reply::MultiBulk(items)))
    }

    // =========================================================================
    // Hashes
    // =========================================================================

    fn cmd_hset(&mut self, cmd: CmdType, args: &[Bytes]) -> Result<Applied> {
        let key = &args[0];
        let pairs = &args[1..];
        if pairs.len() % 2 != 0 {
            return Err(KvError::WrongArity("hset".to_string()));
        }
        if self.hash_mut(key)?.is_none() {
            self.put(key.clone(), Value::Hash(HashEntity::new(key.clone())));
        }
        let hash = self.hash_mut(key)?.ok_or(KvError::WrongType)?;
        let added = pairs
            .chunks_exact(2)
            .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()))
            .count();
        Ok(Applied::write(Reply::Integer(added as i64), cmd_line(cmd, args)))
    }

    fn cmd_hget(&mut self, args: &[Bytes]) -> Result<Applied> {
        let value = self.hash_mut(&args[0])?.and_then(|h| h.get(&args[1]).cloned());
        Ok(Applied::read(value.map_or(Reply::Null, Reply::Bulk)))
    }

    fn cmd_hdel(&mut self, args: &[Bytes]) -> Result<Applied> {
        let key = &args[0];
        let (removed, emptied) = match self.hash_mut(key)? {
            None => return Ok(Applied::read(Reply::Integer(0))),
            Some(hash) => {
                let removed: Vec<Bytes> =
                    args[1..].iter().filter(|f| hash.remove(f)).cloned().collect();
                (removed, hash.is_empty())
            }
        };
        if emptied {
            self.remove(key);
        }
        if removed.is_empty() {
            return Ok(Applied::read(Reply::Integer(0)));
        }
        let mut line = vec![key.clone()];
        line.extend(removed.iter().cloned());
        Ok(Applied::write(
            Reply::Integer(removed.len() as i64),
            cmd_line(CmdType::HDel, &line),
        ))
    }

    // =========================================================================
    // Sets
    // =========================================================================

    fn cmd_sadd(&mut self, cmd: CmdType, args: &[Bytes]) -> Result<Applied> {
        let key = &args[0];
        if self.set_mut(key)?.is_none() {
            self.put(key.clone(), Value::Set(SetEntity::new(key.clone())));
        }
        let set = self.set_mut(key)?.ok_or(KvError::WrongType)?;
        let added = args[1..].iter().filter(|m| set.insert((*m).clone())).count();
        if added == 0 {
            return Ok(Applied::read(Reply::Integer(0)));
        }
        Ok(Applied::write(Reply::Integer(added as i64), cmd_line(cmd, args)))
    }

    fn cmd_srem(&mut self, args: &[Bytes]) -> Result<Applied> {
        let key = &args[0];
        let (removed, emptied) = match self.set_mut(key)? {
            None => return Ok(Applied::read(Reply::Integer(0))),
            Some(set) => {
                let removed: Vec<Bytes> =
                    args[1..].iter().filter(|m| set.remove(m)).cloned().collect();
                (removed, set.is_empty())
            }
        };
        if emptied {
            self.remove(key);
        }
        if removed.is_empty() {
            return Ok(Applied::read(Reply::Integer(0)));
        }
        let mut line = vec![key.clone()];
        line.extend(removed.iter().cloned());
        Ok(Applied::write(
            Reply::Integer(removed.len() as i64),
            cmd_line(CmdType::SRem, &line),
        ))
    }
}
