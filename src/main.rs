//! Caching forward HTTP proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                  CACHING PROXY                       │
//!                  │                                                      │
//!   Client ───────▶│  ┌──────────┐   ┌────────────┐   ┌──────────────┐   │
//!                  │  │   net    │──▶│   proxy    │──▶│    cache     │   │
//!                  │  │ listener │   │ event loop │   │  (DashMap)   │   │
//!   Client ◀───────│  │ + conns  │◀──│            │◀──│              │   │
//!                  │  └──────────┘   └─────┬──────┘   └──────▲───────┘   │
//!                  │                 jobs  │  ▲ completions   │ insert    │
//!                  │                       ▼  │               │           │
//!                  │                 ┌────────────┐   ┌──────────────┐   │
//!                  │                 │  dispatch  │──▶│    origin    │───┼──▶ Origin
//!                  │                 │    pool    │   │   fetcher    │   │    Server
//!                  │                 └────────────┘   └──────────────┘   │
//!                  └──────────────────────────────────────────────────────┘
//! ```
//!
//! The event loop runs on a current-thread runtime; it is the only thread
//! that touches client sockets. Origin fetches block on pool workers.

use std::path::PathBuf;

use clap::Parser;

use caching_proxy::config::{load_config, validation::validate_config, ConfigError, ProxyConfig};
use caching_proxy::lifecycle::startup;
use caching_proxy::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "caching-proxy")]
#[command(about = "Forwarding HTTP proxy with an in-memory response cache", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind host
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of origin fetch workers
    #[arg(short, long)]
    workers: Option<usize>,
}

impl Cli {
    fn apply(self, config: &mut ProxyConfig) {
        if let Some(host) = self.host {
            config.listener.host = host;
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(workers) = self.workers {
            config.dispatch.workers = workers;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability);
    tracing::info!("caching-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        workers = config.dispatch.workers,
        "Configuration loaded"
    );

    let dump = startup::run(config).await?;

    tracing::info!(cached_entries = dump.entries.len(), "Shutdown complete");
    Ok(())
}
