//! Engine Module
//!
//! Wires the components together and owns their lifecycle.
//!
//! ## Responsibilities
//! - Open the append-only log (or run without one)
//! - Spawn the executor that owns the keyspace
//! - Replay the log before any client traffic
//! - Run background rewrites when the log grows
//! - Shut everything down in order

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam::channel::{self, Sender};
use crossbeam::select;
use parking_lot::Mutex;

use crate::aof::{AofPersister, NullPersister, Persister, RewriteStats};
use crate::config::Config;
use crate::dispatch::{Context, Executor, Gateway};
use crate::error::{KvError, Result};
use crate::network::Handler;
use crate::protocol::Reply;
use crate::store::DataStore;

/// The assembled key-value server core
///
/// ## Concurrency Model: Single Writer
///
/// - All commands, reads included, are applied by one executor thread
/// - Callers on any thread submit through the gateway and block for the reply
/// - The log is appended by the executor before a reply is released
/// - Rewrites run on a watcher thread and only take the log lock briefly
pub struct Engine {
    config: Config,

    handler: Arc<Handler>,

    /// `None` when the append-only log is disabled
    aof: Option<Arc<AofPersister>>,

    /// Stops the auto-rewrite watcher when dropped
    watcher: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,

    closed: AtomicBool,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Open the log
    /// 3. Spawn the executor over an empty store
    /// 4. Replay the log
    /// 5. Start the auto-rewrite watcher
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let aof = if config.append_only {
            Some(AofPersister::open(
                &config.aof_path(),
                config.aof_sync_strategy,
                config.auto_rewrite_after,
            )?)
        } else {
            None
        };
        let persister: Arc<dyn Persister> = match &aof {
            Some(aof) => Arc::clone(aof) as Arc<dyn Persister>,
            None => Arc::new(NullPersister),
        };

        let executor = Executor::spawn(
            DataStore::new(),
            Arc::clone(&persister),
            config.executor_queue_capacity,
        )?;
        let handler = Arc::new(Handler::new(
            Gateway::new(executor),
            persister,
            config.command_timeout(),
        ));

        let stats = handler.start()?;
        tracing::info!(
            commands = stats.commands,
            aof = config.append_only,
            "Engine opened"
        );

        let watcher = match &aof {
            Some(aof) if config.auto_rewrite_after.is_some() => Some(spawn_rewrite_watcher(aof)?),
            _ => None,
        };

        Ok(Self {
            config,
            handler,
            aof,
            watcher: Mutex::new(watcher),
            closed: AtomicBool::new(false),
        })
    }

    /// Execute one request; `args[0]` is the command name
    pub fn execute(&self, ctx: &Context, args: Vec<Bytes>) -> Reply {
        self.handler.gateway().execute(ctx, args)
    }

    /// Compact the log now
    pub fn rewrite_aof(&self) -> Result<RewriteStats> {
        match &self.aof {
            Some(aof) => aof.rewrite(),
            None => Err(KvError::Config("append-only log is disabled".to_string())),
        }
    }

    pub fn handler(&self) -> &Arc<Handler> {
        &self.handler
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path of the log, if enabled
    pub fn aof_path(&self) -> Option<PathBuf> {
        self.aof.as_ref().map(|aof| aof.path().to_path_buf())
    }

    /// Current size of the log in bytes (0 when disabled)
    pub fn aof_size(&self) -> Result<u64> {
        match &self.aof {
            Some(aof) => aof.size(),
            None => Ok(0),
        }
    }

    /// Stop background work, the executor and the log. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some((stop, handle)) = self.watcher.lock().take() {
            drop(stop);
            let _ = handle.join();
        }
        self.handler.close()?;
        tracing::info!("Engine closed");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "failed to close engine");
        }
    }
}

/// Run a rewrite each time the log signals its threshold was crossed
fn spawn_rewrite_watcher(aof: &Arc<AofPersister>) -> Result<(Sender<()>, JoinHandle<()>)> {
    let (stop_tx, stop_rx) = channel::bounded::<()>(0);
    let trigger = aof.rewrite_trigger();
    let aof = Arc::downgrade(aof);

    let handle = thread::Builder::new()
        .name("aofkv-rewrite".to_string())
        .spawn(move || loop {
            select! {
                recv(trigger) -> msg => {
                    if msg.is_err() {
                        break;
                    }
                    let Some(aof) = aof.upgrade() else { break };
                    match aof.rewrite() {
                        Ok(stats) => tracing::debug!(?stats, "auto rewrite complete"),
                        Err(KvError::RewriteInProgress) => {}
                        Err(e) => tracing::error!(error = %e, "auto rewrite failed"),
                    }
                }
                recv(stop_rx) -> _ => break,
            }
        })?;
    Ok((stop_tx, handle))
}
