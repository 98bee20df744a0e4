//! Stream Handler
//!
//! Drives a byte stream of RESP requests through the gateway. The same loop
//! serves live connections and the startup reload, so replayed commands
//! take exactly the path live commands take.

use std::collections::HashMap;
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::aof::Persister;
use crate::dispatch::{Context, Gateway};
use crate::error::{KvError, Result};
use crate::protocol::{Droplet, Parser, Reply};

/// Counters for one processed stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Requests sent to the gateway
    pub commands: u64,
    /// Requests answered with an error, plus malformed frames
    pub errors: u64,
    /// Bytes of input consumed up to the end of the last complete frame
    pub bytes: u64,
}

/// Counts bytes pulled from the wrapped reader
struct CountingReader<R> {
    inner: R,
    read: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        Ok(n)
    }
}

/// Shared request loop plus the registry of live client sockets
pub struct Handler {
    gateway: Gateway,
    persister: Arc<dyn Persister>,
    parser: Parser,
    command_timeout: Option<Duration>,
    conns: Mutex<HashMap<u64, TcpStream>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Handler {
    pub fn new(
        gateway: Gateway,
        persister: Arc<dyn Persister>,
        command_timeout: Option<Duration>,
    ) -> Self {
        Self {
            gateway,
            persister,
            parser: Parser::new(),
            command_timeout,
            conns: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Replay the persisted log into the store
    ///
    /// Must run before any live traffic. A partial command at the very end
    /// of the log (an interrupted append) is cut off so later appends start
    /// on a command boundary.
    pub fn start(&self) -> Result<StreamStats> {
        let reloader = self.persister.reloader()?;
        let ctx = Context::background().loading();
        let mut stats = StreamStats::default();

        match self.drive(&ctx, reloader, io::sink(), &mut stats) {
            Ok(()) => {}
            Err(KvError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!(
                    commands = stats.commands,
                    valid_len = stats.bytes,
                    "AOF ends with a partial command; truncating it"
                );
                self.persister.truncate(stats.bytes)?;
            }
            Err(e) => return Err(e),
        }

        if stats.errors > 0 {
            warn!(errors = stats.errors, "AOF replay produced error replies");
        }
        info!(commands = stats.commands, "AOF reload complete");
        Ok(stats)
    }

    /// Serve one request stream until it ends or `ctx` is cancelled
    ///
    /// Returns an error if the stream ended on an unrecoverable protocol or
    /// I/O failure.
    pub fn handle_stream<R: Read, W: Write>(
        &self,
        ctx: &Context,
        reader: R,
        writer: W,
    ) -> Result<StreamStats> {
        let mut stats = StreamStats::default();
        self.drive(ctx, reader, writer, &mut stats)?;
        Ok(stats)
    }

    fn drive<R: Read, W: Write>(
        &self,
        ctx: &Context,
        reader: R,
        writer: W,
        stats: &mut StreamStats,
    ) -> Result<()> {
        let mut stream = self.parser.parse_stream(CountingReader { inner: reader, read: 0 });
        let mut writer = BufWriter::new(writer);

        while let Some(droplet) = stream.next() {
            if ctx.err().is_some() {
                break;
            }
            if !droplet.terminated() {
                let buffered = stream.get_ref().buffer().len() as u64;
                stats.bytes = stream.get_ref().get_ref().read - buffered;
            }

            let reply = match droplet {
                Droplet::Terminated(None) => break,
                Droplet::Terminated(Some(err)) => {
                    if !matches!(err, KvError::Io(_)) {
                        writer.write_all(&Reply::from(&err).to_bytes())?;
                    }
                    writer.flush()?;
                    return Err(err);
                }
                Droplet::Error { err, reply } => {
                    debug!(error = %err, "recoverable protocol error");
                    stats.errors += 1;
                    Some(reply)
                }
                Droplet::Reply(request) => match request.into_args() {
                    Some(args) if args.is_empty() => None,
                    Some(args) => {
                        stats.commands += 1;
                        let reply = self.gateway.execute(&self.command_ctx(ctx), args);
                        if reply.is_error() {
                            stats.errors += 1;
                        }
                        Some(reply)
                    }
                    None => {
                        warn!("request is not an array of bulk strings");
                        stats.errors += 1;
                        Some(Reply::from(KvError::Protocol(
                            "expected an array request".to_string(),
                        )))
                    }
                },
            };

            if let Some(reply) = reply {
                writer.write_all(&reply.to_bytes())?;
            }
            // Flush once the pipelined batch already read has been answered
            if stream.get_ref().buffer().is_empty() {
                writer.flush()?;
            }
        }

        writer.flush()?;
        Ok(())
    }

    fn command_ctx(&self, ctx: &Context) -> Context {
        match self.command_timeout {
            Some(timeout) if !ctx.is_loading() => ctx.with_timeout(timeout),
            _ => ctx.clone(),
        }
    }

    // =========================================================================
    // Connection registry
    // =========================================================================

    /// Track a live socket so shutdown can interrupt it
    pub fn register(&self, stream: &TcpStream) -> Result<u64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(KvError::ExecutorClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.conns.lock().insert(id, stream.try_clone()?);
        Ok(id)
    }

    pub fn unregister(&self, id: u64) {
        self.conns.lock().remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.conns.lock().len()
    }

    /// Shut down every registered socket
    pub fn close_connections(&self) {
        let conns: Vec<TcpStream> = self.conns.lock().drain().map(|(_, s)| s).collect();
        if !conns.is_empty() {
            info!(count = conns.len(), "closing client connections");
        }
        for conn in conns {
            let _ = conn.shutdown(Shutdown::Both);
        }
    }

    /// Close connections, stop the executor, then close the persister
    ///
    /// Only the first call has any effect.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.close_connections();
        self.gateway.close();
        self.persister.close()
    }
}
