//! linekv: a concurrent key-value server
//!
//! Speaks a newline-delimited JSON protocol over TCP:
//! - `{"key": K, "value": V}` stores a value
//! - `{"key": K}` retrieves one
//!
//! Features:
//! - Sharded in-memory keyspace with per-key linearizable put/get
//! - Bounded connection concurrency with graceful drain on shutdown
//! - Configuration via CLI arguments or TOML file

use linekv::config::Config;
use linekv::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        max_connections = config.max_connections,
        shards = config.shards,
        idle_timeout = config.idle_timeout,
        workers = ?config.workers,
        "Starting linekv server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async {
        let server = Server::bind(config)?;
        server.run_until_ctrl_c().await
    })?;

    Ok(())
}
