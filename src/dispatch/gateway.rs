//! Dispatch gateway
//!
//! Validates raw argument vectors, forwards them to the executor and waits
//! for the reply, the caller's cancellation or the deadline, whichever
//! comes first.

use bytes::Bytes;
use crossbeam::channel::{self, Receiver};
use crossbeam::select;

use super::{CmdType, Command, Context, Executor};
use crate::error::KvError;
use crate::protocol::Reply;
use crate::store::DataStore;

/// Front door to an [`Executor`]
pub struct Gateway {
    executor: Executor,
}

impl Gateway {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Execute one request; `args[0]` is the command name
    ///
    /// Always produces a reply. Failures (unknown command, wrong arity,
    /// cancellation, timeout, closed executor) become error replies.
    pub fn execute(&self, ctx: &Context, mut args: Vec<Bytes>) -> Reply {
        let Some(name) = args.first() else {
            return Reply::error("empty command");
        };
        let Some(spec) = CmdType::lookup(name) else {
            let name = String::from_utf8_lossy(name).into_owned();
            return Reply::from(KvError::UnknownCommand(name));
        };
        if !spec.arity.accepts(args.len()) {
            return Reply::from(KvError::WrongArity(spec.name.to_string()));
        }
        if let Some(err) = ctx.err() {
            return Reply::from(err);
        }

        let cmd_args = args.split_off(1);
        let (tx, rx) = channel::bounded::<Reply>(1);
        let command = Command::new(ctx.clone(), spec.cmd, cmd_args, tx);
        let deadline = deadline_channel(ctx);

        select! {
            send(self.executor.entrance(), command) -> res => {
                if res.is_err() {
                    return Reply::from(KvError::ExecutorClosed);
                }
            }
            recv(ctx.done()) -> _ => return Reply::from(KvError::Cancelled),
            recv(deadline) -> _ => return Reply::from(KvError::DeadlineExceeded),
            recv(self.executor.closed()) -> _ => return Reply::from(KvError::ExecutorClosed),
        }

        select! {
            recv(rx) -> reply => reply.unwrap_or_else(|_| Reply::from(KvError::ExecutorClosed)),
            recv(ctx.done()) -> _ => Reply::from(KvError::Cancelled),
            recv(deadline) -> _ => Reply::from(KvError::DeadlineExceeded),
            recv(self.executor.closed()) -> _ => rx
                .try_recv()
                .unwrap_or_else(|_| Reply::from(KvError::ExecutorClosed)),
        }
    }

    /// Stop the executor and hand back its store
    pub fn close(&self) -> Option<DataStore> {
        self.executor.close()
    }
}

fn deadline_channel(ctx: &Context) -> Receiver<std::time::Instant> {
    match ctx.deadline() {
        Some(deadline) => channel::at(deadline),
        None => channel::never(),
    }
}
