//! rtt-bench: TCP round-trip latency benchmark
//!
//! Two roles share one binary:
//! - `server`: single-threaded readiness-driven echo server for 16-byte messages
//! - `client`: N worker threads, each timing closed-loop send/receive cycles
//!   over its own connection, merged into one report at the end
//!
//! Configuration via CLI arguments or TOML file.

mod client;
mod config;
mod protocol;
mod runtime;

use config::{Config, Role};
use std::io::Write;
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
        .with_writer(std::io::stderr)
        .init();

    info!(role = ?config.role, "Starting rtt-bench");

    match config.role {
        Role::Server => run_server(config),
        Role::Client => run_client(config),
    }
}

/// Run the echo server until the listener fails.
fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        host = %config.server.host,
        port = config.server.port,
        max_connections = config.server.max_connections,
        "Using mio runtime (epoll/kqueue)"
    );
    runtime::run_server(&config.server)?;
    Ok(())
}

/// Run the client fleet and print the aggregate report.
fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let report = client::run(&config.client);
    writeln!(std::io::stdout().lock(), "{report}")?;
    Ok(())
}
