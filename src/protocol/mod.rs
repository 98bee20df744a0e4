//! Protocol Module
//!
//! RESP (REdis Serialization Protocol) encoding and decoding. The same
//! encoding is used on the wire and in the append-only log.
//!
//! ## Command Format
//! ```text
//! *<argc>\r\n
//! $<len(arg0)>\r\n<arg0>\r\n
//! $<len(arg1)>\r\n<arg1>\r\n
//! ...
//! ```
//!
//! ## Reply Types
//! - `+` status, `-` error, `:` integer
//! - `$` bulk string (`$-1` null)
//! - `*` array

mod reply;
mod parser;

pub use reply::{encode_command, Reply};
pub use parser::{Droplet, DropletStream, Parser, ParserLimits, DEFAULT_MAX_ARRAY_LEN};
