//! Configuration for AofKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for an AofKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     └── appendonly.aof   (append-only command log)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // AOF Configuration
    // -------------------------------------------------------------------------
    /// Whether mutating commands are logged at all
    pub append_only: bool,

    /// File name of the log inside `data_dir`
    pub aof_filename: String,

    /// Sync strategy: how often to fsync the log
    pub aof_sync_strategy: AofSyncStrategy,

    /// Start a background rewrite after this many appended commands
    pub auto_rewrite_after: Option<u64>,

    // -------------------------------------------------------------------------
    // Executor Configuration
    // -------------------------------------------------------------------------
    /// Capacity of the executor's bounded mailbox
    pub executor_queue_capacity: usize,

    /// Per-command deadline applied to client requests (milliseconds)
    pub command_timeout_ms: Option<u64>,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds, 0 = none)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,
}

/// AOF sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AofSyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// fsync after N appended commands
    EveryNEntries { count: usize },

    /// fsync once per second from a background ticker
    EverySecond,

    /// leave flushing to the operating system
    Never,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./aofkv_data"),
            append_only: true,
            aof_filename: "appendonly.aof".to_string(),
            aof_sync_strategy: AofSyncStrategy::EverySecond,
            auto_rewrite_after: Some(10_000),
            executor_queue_capacity: 1024,
            command_timeout_ms: None,
            listen_addr: "127.0.0.1:6379".to_string(),
            max_connections: 1024,
            read_timeout_ms: 0,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Full path of the append-only log
    pub fn aof_path(&self) -> PathBuf {
        self.data_dir.join(&self.aof_filename)
    }

    /// Per-command deadline as a `Duration`
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Enable or disable the append-only log
    pub fn append_only(mut self, enabled: bool) -> Self {
        self.config.append_only = enabled;
        self
    }

    /// Set the log file name
    pub fn aof_filename(mut self, name: impl Into<String>) -> Self {
        self.config.aof_filename = name.into();
        self
    }

    /// Set the AOF sync strategy
    pub fn aof_sync_strategy(mut self, strategy: AofSyncStrategy) -> Self {
        self.config.aof_sync_strategy = strategy;
        self
    }

    /// Set the auto-rewrite threshold (`None` disables automatic rewrites)
    pub fn auto_rewrite_after(mut self, commands: Option<u64>) -> Self {
        self.config.auto_rewrite_after = commands;
        self
    }

    /// Set the executor mailbox capacity
    pub fn executor_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.executor_queue_capacity = capacity;
        self
    }

    /// Set the per-command deadline (in milliseconds)
    pub fn command_timeout_ms(mut self, ms: Option<u64>) -> Self {
        self.config.command_timeout_ms = ms;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
