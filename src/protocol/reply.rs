//! Reply definitions
//!
//! RESP values exchanged with clients and written to the log.

use bytes::Bytes;

use crate::error::KvError;

const CRLF: &[u8] = b"\r\n";

/// A RESP value
///
/// Server-generated replies and client requests share this type: a decoded
/// request is always a `MultiBulk`, which is the only variant exposing
/// [`Reply::args`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+<text>`
    Status(String),

    /// `-<text>`; the text carries its own prefix (`ERR`, `WRONGTYPE`, ...)
    Error(String),

    /// `:<n>`
    Integer(i64),

    /// `$<len>` followed by the payload
    Bulk(Bytes),

    /// `$-1`
    Null,

    /// `*<n>` of bulk strings; also the shape of every logged command
    MultiBulk(Vec<Bytes>),

    /// `*<n>` of arbitrary nested replies
    Array(Vec<Reply>),
}

impl Reply {
    /// `+OK`
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// An `ERR`-prefixed error reply
    pub fn error(message: impl AsRef<str>) -> Self {
        Reply::Error(format!("ERR {}", message.as_ref()))
    }

    /// The distinguished type-mismatch reply
    pub fn wrong_type() -> Self {
        Reply::from(&KvError::WrongType)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Argument vector of a decoded client request
    ///
    /// Returns `None` for anything that is not a multi-bulk array.
    pub fn args(&self) -> Option<&[Bytes]> {
        match self {
            Reply::MultiBulk(args) => Some(args),
            _ => None,
        }
    }

    /// Consuming variant of [`Reply::args`]
    pub fn into_args(self) -> Option<Vec<Bytes>> {
        match self {
            Reply::MultiBulk(args) => Some(args),
            _ => None,
        }
    }

    /// Serialize to RESP bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Status(text) => {
                out.push(b'+');
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Reply::Error(text) => {
                out.push(b'-');
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Reply::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(CRLF);
            }
            Reply::Bulk(payload) => write_bulk(out, payload),
            Reply::Null => out.extend_from_slice(b"$-1\r\n"),
            Reply::MultiBulk(args) => write_multi_bulk(out, args),
            Reply::Array(items) => {
                write_header(out, b'*', items.len());
                for item in items {
                    item.write_into(out);
                }
            }
        }
    }
}

impl From<&KvError> for Reply {
    fn from(err: &KvError) -> Self {
        Reply::Error(format!("{} {}", err.reply_prefix(), err))
    }
}

impl From<KvError> for Reply {
    fn from(err: KvError) -> Self {
        Reply::from(&err)
    }
}

/// Encode one command as a multi-bulk array
///
/// This is the log format: `*<argc>\r\n` then `$<len>\r\n<arg>\r\n` per
/// argument. The result is self-delimiting, so commands can simply be
/// concatenated.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let payload: usize = args.iter().map(|a| a.as_ref().len() + 16).sum();
    let mut out = Vec::with_capacity(16 + payload);
    write_multi_bulk(&mut out, args);
    out
}

fn write_header(out: &mut Vec<u8>, tag: u8, len: usize) {
    out.push(tag);
    out.extend_from_slice(len.to_string().as_bytes());
    out.extend_from_slice(CRLF);
}

fn write_bulk(out: &mut Vec<u8>, payload: &[u8]) {
    write_header(out, b'$', payload.len());
    out.extend_from_slice(payload);
    out.extend_from_slice(CRLF);
}

fn write_multi_bulk<A: AsRef<[u8]>>(out: &mut Vec<u8>, args: &[A]) {
    write_header(out, b'*', args.len());
    for arg in args {
        write_bulk(out, arg.as_ref());
    }
}
