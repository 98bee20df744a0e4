//! TCP Server
//!
//! Accepts connections and serves each one on its own thread.

use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Connection, Handler};
use crate::config::Config;
use crate::dispatch::Context;
use crate::engine::Engine;
use crate::error::Result;

/// Pause between polls of the non-blocking listener
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// TCP server for aofkv
pub struct Server {
    config: Config,
    engine: Arc<Engine>,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
    active: Arc<AtomicUsize>,
}

/// Cloneable trigger that stops a running [`Server`]
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    ctx: Context,
    handler: Arc<Handler>,
}

impl ShutdownHandle {
    /// Stop accepting, cancel in-flight requests and close live sockets.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.flag.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Server shutdown requested");
        self.ctx.cancel();
        self.handler.close_connections();
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Server {
    /// Bind the listener described by `config.listen_addr`
    pub fn bind(config: Config, engine: Arc<Engine>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shutdown = ShutdownHandle {
            flag: Arc::new(AtomicBool::new(false)),
            ctx: Context::background(),
            handler: Arc::clone(engine.handler()),
        };

        tracing::info!("Listening on {}", local_addr);
        Ok(Self {
            config,
            engine,
            listener,
            local_addr,
            shutdown,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shut down (blocking)
    pub fn run(&self) -> Result<()> {
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while !self.shutdown.is_shutdown() {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    workers.retain(|w| !w.is_finished());
                    if let Err(e) = self.accept(stream, &mut workers) {
                        tracing::warn!("Failed to set up connection from {}: {}", addr, e);
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::error!("Accept failed: {}", e);
                    return Err(e.into());
                }
            }
        }

        self.engine.handler().close_connections();
        for worker in workers {
            let _ = worker.join();
        }
        tracing::info!("Server stopped accepting connections");
        Ok(())
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    fn accept(&self, mut stream: TcpStream, workers: &mut Vec<JoinHandle<()>>) -> Result<()> {
        stream.set_nonblocking(false)?;

        if self.active.load(Ordering::SeqCst) >= self.config.max_connections {
            tracing::warn!("Connection limit ({}) reached", self.config.max_connections);
            let _ = stream.write_all(b"-ERR max number of clients reached\r\n");
            return Ok(());
        }

        let mut conn = Connection::new(stream, Arc::clone(self.engine.handler()))?;
        conn.set_timeouts(self.config.read_timeout_ms, self.config.write_timeout_ms)?;

        let ctx = self.shutdown.ctx.clone();
        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("aofkv-conn".to_string())
            .spawn(move || {
                let _ = conn.handle(&ctx);
                active.fetch_sub(1, Ordering::SeqCst);
            });
        match spawned {
            Ok(worker) => {
                workers.push(worker);
                Ok(())
            }
            Err(e) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }
}
