//! Connection Handler
//!
//! Serves a single client socket through the shared [`Handler`].

use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use super::Handler;
use crate::dispatch::Context;
use crate::error::{KvError, Result};

/// One accepted client
pub struct Connection {
    stream: TcpStream,

    handler: Arc<Handler>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Wrap an accepted socket
    pub fn new(stream: TcpStream, handler: Arc<Handler>) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Replies are small and latency-bound
        stream.set_nodelay(true)?;

        Ok(Self { stream, handler, peer_addr })
    }

    /// Configure socket timeouts; zero leaves a timeout disabled
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.stream.set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.stream.set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Serve requests until the client disconnects or `ctx` is cancelled
    pub fn handle(&mut self, ctx: &Context) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        let id = self.handler.register(&self.stream)?;
        // Shutdown may have drained the registry before this socket was added
        if ctx.err().is_some() {
            self.handler.unregister(id);
            tracing::debug!("Server shutting down, dropping client {}", self.peer_addr);
            return Ok(());
        }
        let reader = self.stream.try_clone()?;
        let result = self.handler.handle_stream(ctx, reader, &self.stream);
        self.handler.unregister(id);

        match result {
            Ok(stats) => {
                tracing::debug!(
                    commands = stats.commands,
                    errors = stats.errors,
                    "Client {} disconnected",
                    self.peer_addr
                );
                Ok(())
            }
            Err(KvError::Io(ref e)) if is_disconnect(e.kind()) => {
                tracing::debug!("Client {} went away: {}", self.peer_addr, e);
                Ok(())
            }
            Err(KvError::Io(ref e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                tracing::debug!("Read timeout for client {}", self.peer_addr);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Error serving {}: {}", self.peer_addr, e);
                Err(e)
            }
        }
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}
