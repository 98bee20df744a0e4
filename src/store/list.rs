//! List entity
//!
//! Ring-buffer deque with power-of-two capacity.
//!
//! ## Layout
//! ```text
//!   cap = 8, head = 6, size = 4
//!   ┌───┬───┬───┬───┬───┬───┬───┬───┐
//!   │ c │ d │   │   │   │   │ a │ b │
//!   └───┴───┴───┴───┴───┴───┴───┴───┘
//!             ▲ tail          ▲ head
//!   logical order: a b c d
//! ```
//!
//! Logical element `i` lives at slot `(head + i) & (cap - 1)`. Capacity only
//! ever doubles; growth unwraps the ring into a zero-based layout.

use bytes::Bytes;

use crate::error::{KvError, Result};

/// Initial slot count of a new list
pub const DEFAULT_CAP: usize = 16;

/// Hard ceiling on slot count (2^30)
pub const MAX_CAP: usize = 1 << 30;

/// Elements carried by one reconstruction command
pub const ITEMS_PER_CMD: usize = 64;

/// Double-ended list of byte strings
#[derive(Debug, Clone)]
pub struct ListEntity {
    key: Bytes,
    buffer: Vec<Option<Bytes>>,
    head: usize,
    tail: usize,
    size: usize,
    cap: usize,
    max_cap: usize,
}

impl ListEntity {
    /// Create a list holding `elements` in order
    pub fn new(key: Bytes, elements: Vec<Bytes>) -> Result<Self> {
        Self::with_limits(key, elements, MAX_CAP)
    }

    /// Create a list with a custom capacity ceiling (rounded up to a power of two)
    pub fn with_limits(key: Bytes, elements: Vec<Bytes>, max_cap: usize) -> Result<Self> {
        let max_cap = max_cap.clamp(1, MAX_CAP).next_power_of_two();
        if elements.len() > max_cap {
            return Err(KvError::CapacityExceeded { max: max_cap });
        }
        let cap = round_cap(elements.len().max(DEFAULT_CAP), max_cap);
        let size = elements.len();
        let mut buffer: Vec<Option<Bytes>> = elements.into_iter().map(Some).collect();
        buffer.resize(cap, None);
        Ok(Self {
            key,
            buffer,
            head: 0,
            tail: size & (cap - 1),
            size,
            cap,
            max_cap,
        })
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Current slot count (always a power of two)
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Whether `extra` more elements fit without exceeding the ceiling
    pub fn can_hold(&self, extra: usize) -> bool {
        self.size
            .checked_add(extra)
            .is_some_and(|total| total <= self.max_cap)
    }

    fn mask(&self) -> usize {
        self.cap - 1
    }

    /// Double the slot count, unwrapping the ring. No-op at the ceiling.
    fn grow(&mut self) {
        let new_cap = (self.cap * 2).min(self.max_cap);
        if new_cap == self.cap {
            return;
        }
        let mut buffer = Vec::with_capacity(new_cap);
        for i in 0..self.size {
            let slot = (self.head + i) & self.mask();
            buffer.push(self.buffer[slot].take());
        }
        buffer.resize(new_cap, None);
        self.buffer = buffer;
        self.head = 0;
        self.tail = self.size;
        self.cap = new_cap;
    }

    fn ensure_room(&mut self) -> Result<()> {
        if self.size == self.cap {
            self.grow();
            if self.size == self.cap {
                return Err(KvError::CapacityExceeded { max: self.max_cap });
            }
        }
        Ok(())
    }

    /// Push onto the head
    pub fn push_left(&mut self, value: Bytes) -> Result<()> {
        self.ensure_room()?;
        self.head = (self.head + self.cap - 1) & self.mask();
        self.buffer[self.head] = Some(value);
        self.size += 1;
        Ok(())
    }

    /// Push onto the tail
    pub fn push_right(&mut self, value: Bytes) -> Result<()> {
        self.ensure_room()?;
        self.buffer[self.tail] = Some(value);
        self.tail = (self.tail + 1) & self.mask();
        self.size += 1;
        Ok(())
    }

    /// Pop `n` elements from the head, all or nothing
    pub fn pop_left(&mut self, n: usize) -> Option<Vec<Bytes>> {
        if self.size < n {
            return None;
        }
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.buffer[self.head].take().unwrap_or_default());
            self.head = (self.head + 1) & self.mask();
            self.size -= 1;
        }
        Some(out)
    }

    /// Pop `n` elements from the tail, all or nothing.
    /// The result is in left-to-right order.
    pub fn pop_right(&mut self, n: usize) -> Option<Vec<Bytes>> {
        if self.size < n {
            return None;
        }
        let mut out = vec![Bytes::new(); n];
        for i in 0..n {
            self.tail = (self.tail + self.cap - 1) & self.mask();
            out[n - 1 - i] = self.buffer[self.tail].take().unwrap_or_default();
            self.size -= 1;
        }
        Some(out)
    }

    /// Element at logical index `idx`
    pub fn get(&self, idx: usize) -> Option<&Bytes> {
        if idx >= self.size {
            return None;
        }
        self.buffer[(self.head + idx) & self.mask()].as_ref()
    }

    /// Inclusive logical range; `stop == -1` means the last element.
    /// Returns `None` when the list is empty or the bounds are invalid.
    pub fn range(&self, start: i64, stop: i64) -> Option<Vec<Bytes>> {
        if self.size == 0 {
            return None;
        }
        let size = self.size as i64;
        let stop = if stop == -1 { size - 1 } else { stop };
        if start < 0 || start >= size {
            return None;
        }
        if stop < 0 || stop >= size || stop < start {
            return None;
        }
        (start..=stop)
            .map(|i| self.get(i as usize).cloned())
            .collect()
    }

    /// Iterate elements head to tail
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> + '_ {
        (0..self.size).filter_map(move |i| self.get(i))
    }

    /// Reconstruction commands: `RPUSH key e0 .. e63`, `RPUSH key e64 ..`, ...
    ///
    /// Batches keep every command far below the decoder's array limit, so
    /// a rewritten log of a huge list still replays.
    pub fn to_cmds(&self) -> Vec<Vec<Bytes>> {
        let items: Vec<Bytes> = self.iter().cloned().collect();
        batched_cmds(b"rpush", &self.key, &items, ITEMS_PER_CMD)
    }
}

/// Split `items` into `name key item..` commands of at most `per_cmd` items
pub(crate) fn batched_cmds(
    name: &'static [u8],
    key: &Bytes,
    items: &[Bytes],
    per_cmd: usize,
) -> Vec<Vec<Bytes>> {
    items
        .chunks(per_cmd.max(1))
        .map(|chunk| {
            let mut args = Vec::with_capacity(2 + chunk.len());
            args.push(Bytes::from_static(name));
            args.push(key.clone());
            args.extend_from_slice(chunk);
            args
        })
        .collect()
}

/// Smallest power of two >= n, clamped to `max_cap`
fn round_cap(n: usize, max_cap: usize) -> usize {
    n.max(1).next_power_of_two().min(max_cap)
}
