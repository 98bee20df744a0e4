//! # aofkv
//!
//! An in-memory key-value server with:
//! - Append-only log (AOF) persistence with startup reload
//! - A single executor thread that owns all state
//! - Online log rewrite that runs alongside live writes
//! - RESP over TCP
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │                  (Multiple Clients)                          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ RESP droplets
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │             Handler ──▶ Gateway (validate, wait)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Command
//!                       ▼
//!               ┌───────────────┐         ┌─────────────┐
//!               │   Executor    │────────▶│     AOF     │
//!               │  (DataStore)  │ persist │  (Append)   │
//!               └───────────────┘         └──────┬──────┘
//!                                                │ rewrite
//!                                                ▼
//!                                         throwaway replay
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod aof;
pub mod dispatch;
pub mod engine;
pub mod network;
pub mod protocol;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use engine::Engine;
pub use error::{KvError, Result};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of aofkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
