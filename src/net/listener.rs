//! TCP listener bound to the configured host and port.

use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(io::Error),
}

/// The proxy's listening socket.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to the configured host and port.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr = format!("{}:{}", config.host, config.port);
        let bind_err = |source| ListenerError::Bind {
            addr: addr.clone(),
            source,
        };

        let inner = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(bind_err)?;
        let local_addr = inner.local_addr().map_err(bind_err)?;

        tracing::info!(address = %local_addr, "Listener bound");
        Ok(Self { inner, local_addr })
    }

    /// Non-blocking accept, driven by the event loop's readiness poll.
    pub fn poll_accept(
        &self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(TcpStream, SocketAddr), ListenerError>> {
        self.inner.poll_accept(cx).map_err(ListenerError::Accept)
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
