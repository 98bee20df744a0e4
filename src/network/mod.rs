//! Network Module
//!
//! TCP server and the request loop it shares with startup reload.
//!
//! ## Architecture
//! - Single acceptor thread polling a non-blocking listener
//! - One thread per connection
//! - Every request goes through the `Handler` into the dispatch gateway

mod connection;
mod handler;
mod server;

pub use connection::Connection;
pub use handler::{Handler, StreamStats};
pub use server::{Server, ShutdownHandle};
