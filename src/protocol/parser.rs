//! RESP stream parser
//!
//! Turns a byte stream into a lazy sequence of [`Droplet`]s. One stream is
//! created per connection (or per reload); it ends after yielding a
//! `Terminated` droplet.

use std::io::{BufRead, BufReader, ErrorKind, Read};

use bytes::Bytes;

use crate::error::KvError;

use super::Reply;

/// Default maximum length of a single bulk string (512 MB)
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Default maximum number of elements in one multi-bulk array
pub const DEFAULT_MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Default maximum length of a header or inline line
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Size limits enforced while decoding
#[derive(Debug, Clone, Copy)]
pub struct ParserLimits {
    pub max_bulk_len: usize,
    pub max_array_len: usize,
    pub max_line_len: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_bulk_len: DEFAULT_MAX_BULK_LEN,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

/// One decoded unit of a byte stream
#[derive(Debug)]
pub enum Droplet {
    /// A complete RESP value (requests are `Reply::MultiBulk`)
    Reply(Reply),

    /// A malformed frame the stream recovered from; `reply` is what the
    /// client should be told
    Error { err: KvError, reply: Reply },

    /// End of stream. `None` for a clean EOF between frames.
    Terminated(Option<KvError>),
}

impl Droplet {
    pub fn terminated(&self) -> bool {
        matches!(self, Droplet::Terminated(_))
    }
}

/// Factory for droplet streams
#[derive(Debug, Clone, Copy, Default)]
pub struct Parser {
    limits: ParserLimits,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ParserLimits) -> Self {
        Self { limits }
    }

    /// Wrap a reader in a buffered droplet stream
    pub fn parse_stream<R: Read>(&self, reader: R) -> DropletStream<BufReader<R>> {
        self.parse_buffered(BufReader::new(reader))
    }

    /// Same as [`Parser::parse_stream`] for a reader that is already buffered
    pub fn parse_buffered<R: BufRead>(&self, reader: R) -> DropletStream<R> {
        DropletStream {
            reader,
            limits: self.limits,
            line: Vec::new(),
            done: false,
        }
    }
}

/// Lazy iterator of droplets over one byte stream
pub struct DropletStream<R> {
    reader: R,
    limits: ParserLimits,
    line: Vec<u8>,
    done: bool,
}

/// Why a frame could not be decoded
enum Fault {
    /// The bad frame was fully consumed; the stream is still in sync
    Recoverable(KvError),
    /// The stream position is unknown or the source failed
    Fatal(KvError),
}

impl From<std::io::Error> for Fault {
    fn from(err: std::io::Error) -> Self {
        Fault::Fatal(KvError::Io(err))
    }
}

impl<R: BufRead> DropletStream<R> {
    /// Borrow the underlying reader (e.g. to check for buffered pipelined input)
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Read one CRLF-terminated line into `self.line`, without the terminator.
    /// Returns `false` on EOF before any byte.
    fn read_line(&mut self) -> Result<bool, Fault> {
        self.line.clear();
        let limit = (self.limits.max_line_len + 2) as u64;
        let n = (&mut self.reader).take(limit).read_until(b'\n', &mut self.line)?;
        if n == 0 {
            return Ok(false);
        }
        if self.line.last() != Some(&b'\n') {
            if n as u64 == limit {
                return Err(Fault::Fatal(protocol("line too long")));
            }
            return Err(Fault::Fatal(KvError::Io(ErrorKind::UnexpectedEof.into())));
        }
        self.line.pop();
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        Ok(true)
    }

    fn read_bulk_body(&mut self, len: usize) -> Result<Bytes, Fault> {
        let mut buf = vec![0u8; len + 2];
        self.reader.read_exact(&mut buf)?;
        if &buf[len..] != b"\r\n" {
            return Err(Fault::Fatal(protocol("bulk string not terminated by CRLF")));
        }
        buf.truncate(len);
        Ok(Bytes::from(buf))
    }

    fn bulk_len(&self, raw: &[u8]) -> Result<Option<usize>, KvError> {
        let len = parse_integer(raw).map_err(|_| protocol("invalid bulk length"))?;
        if len < 0 {
            return Ok(None);
        }
        let len = len as usize;
        if len > self.limits.max_bulk_len {
            return Err(protocol("bulk string too large"));
        }
        Ok(Some(len))
    }

    fn read_multi_bulk(&mut self, count: usize) -> Result<Reply, Fault> {
        let mut args = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            if !self.read_line()? {
                return Err(Fault::Fatal(KvError::Io(ErrorKind::UnexpectedEof.into())));
            }
            if self.line.first() != Some(&b'$') {
                return Err(Fault::Fatal(protocol("expected '$' in multibulk request")));
            }
            let len = self.bulk_len(&self.line[1..]).map_err(Fault::Fatal)?;
            match len {
                Some(len) => args.push(self.read_bulk_body(len)?),
                None => args.push(Bytes::new()),
            }
        }
        Ok(Reply::MultiBulk(args))
    }

    fn next_frame(&mut self) -> Result<Option<Reply>, Fault> {
        loop {
            if !self.read_line()? {
                return Ok(None);
            }
            if !self.line.is_empty() {
                break;
            }
        }

        let rest = &self.line[1..];
        match self.line[0] {
            b'*' => {
                let count = parse_integer(rest)
                    .map_err(|_| Fault::Recoverable(protocol("invalid multibulk length")))?;
                if count <= 0 {
                    return Ok(Some(Reply::MultiBulk(Vec::new())));
                }
                let count = count as usize;
                if count > self.limits.max_array_len {
                    return Err(Fault::Fatal(protocol("too many elements in multibulk request")));
                }
                self.read_multi_bulk(count).map(Some)
            }
            b'$' => match self.bulk_len(rest).map_err(Fault::Recoverable)? {
                Some(len) => self.read_bulk_body(len).map(|b| Some(Reply::Bulk(b))),
                None => Ok(Some(Reply::Null)),
            },
            b'+' => Ok(Some(Reply::Status(String::from_utf8_lossy(rest).into_owned()))),
            b'-' => Ok(Some(Reply::Error(String::from_utf8_lossy(rest).into_owned()))),
            b':' => parse_integer(rest)
                .map(|n| Some(Reply::Integer(n)))
                .map_err(|_| Fault::Recoverable(protocol("invalid integer reply"))),
            _ => Ok(Some(Reply::MultiBulk(split_inline(&self.line)))),
        }
    }
}

impl<R: BufRead> Iterator for DropletStream<R> {
    type Item = Droplet;

    fn next(&mut self) -> Option<Droplet> {
        if self.done {
            return None;
        }
        match self.next_frame() {
            Ok(Some(reply)) => Some(Droplet::Reply(reply)),
            Ok(None) => {
                self.done = true;
                Some(Droplet::Terminated(None))
            }
            Err(Fault::Recoverable(err)) => {
                let reply = Reply::from(&err);
                Some(Droplet::Error { err, reply })
            }
            Err(Fault::Fatal(err)) => {
                self.done = true;
                Some(Droplet::Terminated(Some(err)))
            }
        }
    }
}

fn protocol(message: &str) -> KvError {
    KvError::Protocol(message.to_string())
}

fn parse_integer(raw: &[u8]) -> Result<i64, ()> {
    std::str::from_utf8(raw)
        .map_err(|_| ())?
        .parse::<i64>()
        .map_err(|_| ())
}

/// Inline commands: whitespace-separated words on one line
fn split_inline(line: &[u8]) -> Vec<Bytes> {
    line.split(|b| b.is_ascii_whitespace())
        .filter(|word| !word.is_empty())
        .map(Bytes::copy_from_slice)
        .collect()
}
