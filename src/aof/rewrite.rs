//! Online log rewrite
//!
//! Compacts the log into the smallest command sequence that rebuilds the
//! current keyspace, while the executor keeps appending.
//!
//! ## Phases
//! ```text
//!   start    (lock)     fsync, record L = log length, create temp file
//!   rebuild  (no lock)  replay log[0..L) into a throwaway store,
//!                       write its reconstruction commands to the temp file
//!   end      (lock)     copy log[L..end) to the temp file, fsync,
//!                       rename over the log, reopen for append
//! ```
//! The live handle is only replaced after the rename succeeds. On any
//! failure the temp file is removed and the old log stays authoritative.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::{NamedTempFile, PersistError};
use tracing::{error, info, warn};

use super::{open_append, AofPersister, Persister, Reloader, ReplayPersister};
use crate::dispatch::{Executor, Gateway};
use crate::error::{KvError, Result};
use crate::network::Handler;
use crate::protocol::encode_command;
use crate::store::DataStore;

/// Queue size of the throwaway executor used during rebuild
const REPLAY_QUEUE_CAPACITY: usize = 1024;

/// Byte counts of a completed rewrite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Log length captured at the start
    pub base_len: u64,
    /// Bytes of reconstruction commands written for that prefix
    pub rebuilt_len: u64,
    /// Bytes appended by live traffic while the rebuild ran
    pub tail_len: u64,
    /// Live keys written
    pub keys: usize,
}

impl RewriteStats {
    /// Length of the log after the rewrite
    pub fn final_len(&self) -> u64 {
        self.rebuilt_len + self.tail_len
    }
}

/// Clears the in-progress flag however the rewrite ends
struct RewriteGuard<'a>(&'a AtomicBool);

impl Drop for RewriteGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AofPersister {
    /// Rewrite the log online
    ///
    /// Fails with `RewriteInProgress` if another rewrite is running.
    pub fn rewrite(&self) -> Result<RewriteStats> {
        self.rewrite_with(|| {})
    }

    /// [`rewrite`](Self::rewrite), calling `after_rebuild` once the
    /// reconstruction is written and before the tail is spliced in.
    /// Appends made from `after_rebuild` land in the tail.
    pub fn rewrite_with<F: FnOnce()>(&self, after_rebuild: F) -> Result<RewriteStats> {
        if self
            .rewriting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(KvError::RewriteInProgress);
        }
        let _guard = RewriteGuard(&self.rewriting);
        if self.closed.load(Ordering::SeqCst) {
            return Err(KvError::Rewrite("log is closed".to_string()));
        }

        let (base_len, mut tmp) = self.start_rewrite()?;
        let (rebuilt_len, keys) = self.do_rewrite(&mut tmp, base_len)?;
        after_rebuild();
        let tail_len = self.end_rewrite(tmp, base_len)?;

        // Appends made during the rewrite may have queued another trigger
        while self.rewrite_rx.try_recv().is_ok() {}

        let stats = RewriteStats { base_len, rebuilt_len, tail_len, keys };
        info!(
            base_len,
            final_len = stats.final_len(),
            keys,
            "AOF rewrite finished"
        );
        Ok(stats)
    }

    fn start_rewrite(&self) -> Result<(u64, NamedTempFile)> {
        let mut state = self.state.lock();
        if let Some(file) = state.file.as_mut() {
            file.sync_all()?;
        }
        state.unsynced = 0;

        let base_len = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let tmp = tempfile::Builder::new()
            .prefix(".aof-rewrite-")
            .suffix(".tmp")
            .tempfile_in(log_dir(&self.path))?;

        info!(base_len, tmp = %tmp.path().display(), "AOF rewrite started");
        Ok((base_len, tmp))
    }

    fn do_rewrite(&self, tmp: &mut NamedTempFile, base_len: u64) -> Result<(u64, usize)> {
        let source: Reloader = match File::open(&self.path) {
            Ok(file) => Box::new(file.take(base_len)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Box::new(io::empty()),
            Err(e) => return Err(e.into()),
        };
        let store = fork_store(source)?;

        let mut writer = BufWriter::new(tmp.as_file_mut());
        let mut written = 0u64;
        let mut keys = 0usize;
        let mut failure: Option<io::Error> = None;
        store.for_each_cmds(|_, cmds| {
            if failure.is_some() {
                return;
            }
            let buf: Vec<u8> = cmds.iter().flat_map(|cmd| encode_command(cmd)).collect();
            match writer.write_all(&buf) {
                Ok(()) => {
                    written += buf.len() as u64;
                    keys += 1;
                }
                Err(e) => failure = Some(e),
            }
        });
        if let Some(e) = failure {
            return Err(KvError::Rewrite(format!("writing rebuilt log: {e}")));
        }
        writer.flush()?;
        drop(writer);

        info!(base_len, rebuilt_len = written, keys, "AOF rewrite rebuilt base");
        Ok((written, keys))
    }

    fn end_rewrite(&self, mut tmp: NamedTempFile, base_len: u64) -> Result<u64> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if self.closed.load(Ordering::SeqCst) {
            return Err(KvError::Rewrite("log closed during rewrite".to_string()));
        }
        if let Some(file) = state.file.as_mut() {
            file.sync_all()?;
        }

        let mut tail_len = 0;
        match File::open(&self.path) {
            Ok(mut src) => {
                src.seek(SeekFrom::Start(base_len))?;
                tail_len = io::copy(&mut src, tmp.as_file_mut())?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tmp.as_file().sync_all()?;

        if let Err(PersistError { error: e, file }) = tmp.persist(&self.path) {
            drop(file);
            error!(path = %self.path.display(), error = %e, "AOF rewrite rename failed; keeping old log");
            return Err(KvError::Rewrite(format!("rename failed: {e}")));
        }
        if let Err(e) = sync_parent_dir(&self.path) {
            warn!(error = %e, "failed to fsync AOF directory");
        }

        // The old handle points at the unlinked file
        state.file = None;
        match open_append(&self.path) {
            Ok(file) => state.file = Some(file),
            Err(e) => {
                error!(error = %e, "failed to reopen AOF after rewrite; next append retries");
            }
        }
        state.unsynced = 0;
        state.since_rewrite = 0;

        info!(tail_len, "AOF rewrite swapped log");
        Ok(tail_len)
    }
}

/// Replay `source` into a fresh, isolated store
fn fork_store(source: Reloader) -> Result<DataStore> {
    let persister: Arc<dyn Persister> = Arc::new(ReplayPersister::new(source));
    let executor = Executor::spawn(
        DataStore::new(),
        Arc::clone(&persister),
        REPLAY_QUEUE_CAPACITY,
    )?;
    let handler = Handler::new(Gateway::new(executor), persister, None);
    handler.start()?;
    handler
        .gateway()
        .close()
        .ok_or_else(|| KvError::Rewrite("replay executor stopped unexpectedly".to_string()))
}

fn log_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    File::open(log_dir(path))?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
