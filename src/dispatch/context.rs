//! Request context
//!
//! Carries cancellation, an optional deadline and the "loading" flag that
//! marks replayed commands. Clones share the same cancellation signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::KvError;

struct Signal {
    cancelled: AtomicBool,
    // Dropped on cancel; receivers then observe a disconnected channel
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

/// Cancellation-aware context passed along with every command
#[derive(Clone)]
pub struct Context {
    signal: Arc<Signal>,
    deadline: Option<Instant>,
    loading: bool,
}

impl Context {
    /// A fresh, never-expiring context
    pub fn background() -> Self {
        let (done_tx, done_rx) = channel::bounded(0);
        Self {
            signal: Arc::new(Signal {
                cancelled: AtomicBool::new(false),
                done_tx: Mutex::new(Some(done_tx)),
                done_rx,
            }),
            deadline: None,
            loading: false,
        }
    }

    /// Same signal, marked as replaying the log
    pub fn loading(&self) -> Self {
        Self { loading: true, ..self.clone() }
    }

    /// Same signal, with a deadline `timeout` from now
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self { deadline: Some(deadline), ..self.clone() }
    }

    /// Cancel this context and every clone sharing its signal
    pub fn cancel(&self) {
        self.signal.cancelled.store(true, Ordering::SeqCst);
        self.signal.done_tx.lock().take();
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Channel that becomes disconnected once the context is cancelled
    pub fn done(&self) -> &Receiver<()> {
        &self.signal.done_rx
    }

    /// `Some(error)` once cancelled or past the deadline
    pub fn err(&self) -> Option<KvError> {
        if self.signal.cancelled.load(Ordering::SeqCst) {
            return Some(KvError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(KvError::DeadlineExceeded),
            _ => None,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.signal.cancelled.load(Ordering::SeqCst))
            .field("deadline", &self.deadline)
            .field("loading", &self.loading)
            .finish()
    }
}
