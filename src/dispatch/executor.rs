//! Executor
//!
//! Owns the [`DataStore`] on a dedicated thread and applies commands one at
//! a time in arrival order. Every mutation is appended to the log before its
//! reply is released.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;

use super::Command;
use crate::aof::Persister;
use crate::error::{KvError, Result};
use crate::protocol::Reply;
use crate::store::DataStore;

/// Single-writer command loop
pub struct Executor {
    entrance: Sender<Command>,
    stop_tx: Mutex<Option<Sender<()>>>,
    /// Disconnects once the worker thread has exited
    closed_rx: Receiver<()>,
    worker: Mutex<Option<JoinHandle<DataStore>>>,
}

impl Executor {
    /// Move `store` onto a new executor thread
    ///
    /// `queue_capacity` bounds the inbox; senders block once it is full.
    pub fn spawn(
        store: DataStore,
        persister: Arc<dyn Persister>,
        queue_capacity: usize,
    ) -> Result<Self> {
        let (entrance, inbox) = channel::bounded::<Command>(queue_capacity.max(1));
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let (closed_tx, closed_rx) = channel::bounded::<()>(0);

        let worker = thread::Builder::new()
            .name("aofkv-executor".to_string())
            .spawn(move || {
                let store = run(store, persister, inbox, stop_rx);
                drop(closed_tx);
                store
            })?;

        Ok(Self {
            entrance,
            stop_tx: Mutex::new(Some(stop_tx)),
            closed_rx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Inbox sender; commands are applied in the order they arrive
    pub fn entrance(&self) -> &Sender<Command> {
        &self.entrance
    }

    /// Becomes disconnected when the worker stops accepting commands
    pub fn closed(&self) -> &Receiver<()> {
        &self.closed_rx
    }

    /// Stop the worker and take back the store
    ///
    /// Commands still queued are answered with an `ExecutorClosed` error.
    /// Returns `None` if the executor was already closed.
    pub fn close(&self) -> Option<DataStore> {
        self.stop_tx.lock().take();
        let worker = self.worker.lock().take()?;
        match worker.join() {
            Ok(store) => Some(store),
            Err(_) => {
                tracing::error!("executor thread panicked");
                None
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(
    mut store: DataStore,
    persister: Arc<dyn Persister>,
    inbox: Receiver<Command>,
    stop_rx: Receiver<()>,
) -> DataStore {
    tracing::debug!("executor started");
    loop {
        select! {
            recv(inbox) -> msg => match msg {
                Ok(command) => execute(&mut store, persister.as_ref(), command),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
        }
    }

    let mut rejected = 0usize;
    for command in inbox.try_iter() {
        let _ = command.receiver.try_send(Reply::from(KvError::ExecutorClosed));
        rejected += 1;
    }
    tracing::debug!(rejected, keys = store.len(), "executor stopped");
    store
}

fn execute(store: &mut DataStore, persister: &dyn Persister, command: Command) {
    let Command { ctx, cmd, args, receiver } = command;

    // Abandoned before it started: skip it entirely
    if let Some(err) = ctx.err() {
        tracing::trace!(?cmd, error = %err, "skipping abandoned command");
        let _ = receiver.try_send(Reply::from(err));
        return;
    }

    let applied = store.apply(cmd, &args);
    let mut reply = applied.reply;

    debug_assert!(
        applied.log.is_empty() || cmd.is_mutating(),
        "read-only command produced log entries"
    );
    if !ctx.is_loading() && cmd.is_mutating() && !applied.log.is_empty() {
        if let Err(e) = persister.persist(&applied.log) {
            tracing::error!(?cmd, error = %e, "failed to append to AOF");
            reply = Reply::from(KvError::AofWrite(e.to_string()));
        }
    }

    // The waiter may have given up; nothing to do then
    let _ = receiver.try_send(reply);
}
