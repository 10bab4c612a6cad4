//! Startup orchestration.

use std::net::SocketAddr;

use crate::cache::CacheDump;
use crate::config::ProxyConfig;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::proxy::{Proxy, ProxyError};

/// Start the metrics exporter, bind the proxy and serve until a signal.
pub async fn run(config: ProxyConfig) -> Result<CacheDump, ProxyError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let proxy = Proxy::bind(config).await?;
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    signals::spawn_signal_handler(shutdown);

    proxy.run(receiver).await
}
