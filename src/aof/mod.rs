//! Append-Only File (AOF) Module
//!
//! Provides durability by appending every applied mutation to a log of
//! RESP-encoded commands.
//!
//! ## Responsibilities
//! - Append the encoding of each mutating command with a single write
//! - fsync according to the configured strategy
//! - Hand out a read-only view of the log for startup reload
//! - Online compaction (see [`rewrite`])
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ *3\r\n$3\r\nset\r\n$1\r\nk\r\n$1\r\nv\r\n │  command 1
//! ├──────────────────────────────────────────┤
//! │ *3\r\n$5\r\nrpush\r\n ...                 │  command 2
//! └──────────────────────────────────────────┘
//! ```
//! Commands are self-delimiting, so any prefix ending on a command boundary
//! is itself a valid log.

mod rewrite;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::AofSyncStrategy;
use crate::error::{KvError, Result};
use crate::protocol::encode_command;

pub use rewrite::RewriteStats;

/// Readable byte source handed out for replay
pub type Reloader = Box<dyn Read + Send>;

/// File layer consumed by the executor and the reload path
pub trait Persister: Send + Sync {
    /// Bytes to replay at startup
    fn reloader(&self) -> Result<Reloader>;

    /// Append a batch of commands as one write
    fn persist(&self, cmds: &[Vec<Bytes>]) -> Result<()>;

    /// Flush and release resources. Safe to call more than once.
    fn close(&self) -> Result<()>;

    /// Cut the log back to `len` bytes, dropping a damaged tail
    fn truncate(&self, len: u64) -> Result<()> {
        let _ = len;
        Ok(())
    }
}

// =============================================================================
// AofPersister
// =============================================================================

/// Mutable log metadata, guarded by the persister's mutex
struct AofState {
    /// Live append handle; `None` after close or a failed reopen
    file: Option<File>,
    /// Commands written since the last fsync
    unsynced: usize,
    /// Commands written since the last completed rewrite
    since_rewrite: u64,
}

/// The append-only log on disk
pub struct AofPersister {
    path: PathBuf,
    sync_strategy: AofSyncStrategy,
    auto_rewrite_after: Option<u64>,
    state: Mutex<AofState>,
    rewriting: AtomicBool,
    closed: AtomicBool,
    rewrite_tx: Sender<()>,
    rewrite_rx: Receiver<()>,
    ticker: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl AofPersister {
    /// Open or create the log at `path`
    pub fn open(
        path: &Path,
        sync_strategy: AofSyncStrategy,
        auto_rewrite_after: Option<u64>,
    ) -> Result<Arc<Self>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        let (rewrite_tx, rewrite_rx) = channel::bounded(1);

        let persister = Arc::new(Self {
            path: path.to_path_buf(),
            sync_strategy,
            auto_rewrite_after,
            state: Mutex::new(AofState {
                file: Some(file),
                unsynced: 0,
                since_rewrite: 0,
            }),
            rewriting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            rewrite_tx,
            rewrite_rx,
            ticker: Mutex::new(None),
        });

        if sync_strategy == AofSyncStrategy::EverySecond {
            let ticker = spawn_sync_ticker(Arc::downgrade(&persister))?;
            *persister.ticker.lock() = Some(ticker);
        }

        debug!(path = %path.display(), ?sync_strategy, "AOF opened");
        Ok(persister)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the log file in bytes
    pub fn size(&self) -> Result<u64> {
        let _state = self.state.lock();
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Fires once the auto-rewrite threshold is crossed
    pub fn rewrite_trigger(&self) -> Receiver<()> {
        self.rewrite_rx.clone()
    }

    /// Force an fsync of the live handle
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(file) = state.file.as_mut() {
            file.sync_data()?;
        }
        state.unsynced = 0;
        Ok(())
    }
}

impl Persister for AofPersister {
    fn reloader(&self) -> Result<Reloader> {
        let _state = self.state.lock();
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Box::new(io::empty())),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        Ok(Box::new(file.take(len)))
    }

    fn persist(&self, cmds: &[Vec<Bytes>]) -> Result<()> {
        if cmds.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for cmd in cmds {
            buf.extend_from_slice(&encode_command(cmd));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if self.closed.load(Ordering::SeqCst) {
            return Err(KvError::AofWrite("log is closed".to_string()));
        }
        if state.file.is_none() {
            warn!(path = %self.path.display(), "reopening AOF handle");
            state.file = Some(open_append(&self.path)?);
        }
        let Some(file) = state.file.as_mut() else {
            return Err(KvError::AofWrite("no open handle".to_string()));
        };
        file.write_all(&buf)
            .map_err(|e| KvError::AofWrite(e.to_string()))?;

        let sync_now = match self.sync_strategy {
            AofSyncStrategy::EveryWrite => true,
            AofSyncStrategy::EveryNEntries { count } => state.unsynced + cmds.len() >= count,
            AofSyncStrategy::EverySecond | AofSyncStrategy::Never => false,
        };
        if sync_now {
            file.sync_data()
                .map_err(|e| KvError::AofWrite(e.to_string()))?;
            state.unsynced = 0;
        } else {
            state.unsynced += cmds.len();
        }

        state.since_rewrite += cmds.len() as u64;
        if let Some(limit) = self.auto_rewrite_after {
            if state.since_rewrite >= limit && !self.rewriting.load(Ordering::SeqCst) {
                // Bounded(1): a pending trigger absorbs the rest
                let _ = self.rewrite_tx.try_send(());
            }
        }
        Ok(())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.file.is_none() {
            state.file = Some(open_append(&self.path)?);
        }
        if let Some(file) = state.file.as_mut() {
            let before = file.metadata()?.len();
            if len < before {
                file.set_len(len)?;
                file.sync_all()?;
                warn!(dropped = before - len, "truncated damaged AOF tail");
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some((stop, handle)) = self.ticker.lock().take() {
            drop(stop);
            // The ticker may hold the last reference and be closing us itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        let mut state = self.state.lock();
        if let Some(file) = state.file.take() {
            file.sync_all()?;
        }
        info!(path = %self.path.display(), "AOF closed");
        Ok(())
    }
}

impl Drop for AofPersister {
    fn drop(&mut self) {
        if let Err(e) = Persister::close(self) {
            error!(error = %e, "failed to close AOF");
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Background fsync for `AofSyncStrategy::EverySecond`
fn spawn_sync_ticker(persister: Weak<AofPersister>) -> Result<(Sender<()>, JoinHandle<()>)> {
    let (stop_tx, stop_rx) = channel::bounded::<()>(0);
    let ticks = channel::tick(Duration::from_secs(1));
    let handle = thread::Builder::new()
        .name("aofkv-aof-sync".to_string())
        .spawn(move || loop {
            select! {
                recv(ticks) -> _ => {
                    let Some(persister) = persister.upgrade() else { break };
                    if let Err(e) = persister.sync() {
                        error!(error = %e, "periodic AOF fsync failed");
                    }
                }
                recv(stop_rx) -> _ => break,
            }
        })?;
    Ok((stop_tx, handle))
}

// =============================================================================
// NullPersister
// =============================================================================

/// Used when the append-only log is disabled
#[derive(Debug, Default)]
pub struct NullPersister;

impl Persister for NullPersister {
    fn reloader(&self) -> Result<Reloader> {
        Ok(Box::new(io::empty()))
    }

    fn persist(&self, _cmds: &[Vec<Bytes>]) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// ReplayPersister
// =============================================================================

/// Throwaway persister for rebuilding a store from a fixed byte source
///
/// The source is handed out once; appends are discarded.
pub struct ReplayPersister {
    source: Mutex<Option<Reloader>>,
}

impl ReplayPersister {
    pub fn new(source: Reloader) -> Self {
        Self { source: Mutex::new(Some(source)) }
    }
}

impl Persister for ReplayPersister {
    fn reloader(&self) -> Result<Reloader> {
        Ok(self
            .source
            .lock()
            .take()
            .unwrap_or_else(|| Box::new(io::empty())))
    }

    fn persist(&self, _cmds: &[Vec<Bytes>]) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.source.lock().take();
        Ok(())
    }
}
