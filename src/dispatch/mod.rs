//! Dispatch Module
//!
//! Everything between a parsed request and the store.
//!
//! ## Flow
//! ```text
//!   caller ──args──▶ Gateway ──Command──▶ Executor thread
//!                      │  (validate)        │ store.apply
//!                      │                    │ persister.persist
//!                      ◀──────Reply─────────┘
//! ```
//! The gateway waits on the reply, the context's cancellation and the
//! deadline at the same time. The executor skips commands whose context was
//! already cancelled when it dequeues them.

mod command;
mod context;
mod executor;
mod gateway;

pub use command::{valid_command, Arity, CmdSpec, CmdType, Command, REGISTRY};
pub use context::Context;
pub use executor::Executor;
pub use gateway::Gateway;
