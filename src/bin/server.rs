//! aofkv Server Binary
//!
//! Starts the TCP server for aofkv.

use std::sync::Arc;

use aofkv::config::AofSyncStrategy;
use aofkv::network::Server;
use aofkv::{Config, Engine};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

/// aofkv Server
#[derive(Parser, Debug)]
#[command(name = "aofkv-server")]
#[command(about = "In-memory key-value server with append-only persistence")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./aofkv_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Disable the append-only log
    #[arg(long)]
    no_aof: bool,

    /// Log file name inside the data directory
    #[arg(long, default_value = "appendonly.aof")]
    aof_file: String,

    /// When to fsync the log
    #[arg(long, value_enum, default_value = "everysec")]
    fsync: FsyncMode,

    /// Rewrite the log after this many appended commands (0 disables)
    #[arg(long, default_value = "10000")]
    rewrite_after: u64,

    /// Per-command timeout in milliseconds (0 disables)
    #[arg(long, default_value = "0")]
    timeout_ms: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FsyncMode {
    Always,
    Everysec,
    No,
}

impl From<FsyncMode> for AofSyncStrategy {
    fn from(mode: FsyncMode) -> Self {
        match mode {
            FsyncMode::Always => AofSyncStrategy::EveryWrite,
            FsyncMode::Everysec => AofSyncStrategy::EverySecond,
            FsyncMode::No => AofSyncStrategy::Never,
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,aofkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("aofkv Server v{}", aofkv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .append_only(!args.no_aof)
        .aof_filename(&args.aof_file)
        .aof_sync_strategy(args.fsync.into())
        .auto_rewrite_after((args.rewrite_after > 0).then_some(args.rewrite_after))
        .command_timeout_ms((args.timeout_ms > 0).then_some(args.timeout_ms))
        .build();

    let engine = match Engine::open(config.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Engine initialized successfully");

    let server = match Server::bind(config, Arc::clone(&engine)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to bind: {}", e);
            std::process::exit(1);
        }
    };

    // SIGINT, and SIGTERM/SIGHUP through the `termination` feature
    let shutdown = server.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Termination signal received");
        shutdown.shutdown();
    }) {
        tracing::error!("Failed to install signal handler: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = engine.close() {
        tracing::error!("Failed to close engine: {}", e);
    }
    tracing::info!("Server stopped");
}
