//! Origin fetch errors.

use std::io;

use thiserror::Error;

/// Errors that can occur while fetching from an origin.
#[derive(Debug, Error)]
pub enum FetchError {
    /// DNS lookup failed or returned nothing.
    #[error("failed to resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },

    /// No address accepted the connection.
    #[error("origin {target} unreachable: {source}")]
    Unreachable { target: String, source: io::Error },

    /// The origin reset or aborted the connection mid-exchange.
    #[error("origin reset the connection: {0}")]
    Reset(io::Error),

    #[error("origin timed out during {phase}")]
    Timeout { phase: &'static str },

    /// The origin closed without sending a single byte.
    #[error("origin closed the connection without a response")]
    EmptyResponse,

    #[error("origin I/O error: {0}")]
    Io(io::Error),

    /// The fetch panicked; the worker survived.
    #[error("fetch panicked: {0}")]
    Panicked(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Resolve { .. } | FetchError::Unreachable { .. } => "unreachable",
            FetchError::Reset(_) | FetchError::EmptyResponse => "reset",
            FetchError::Timeout { .. } => "timeout",
            FetchError::Io(_) => "io",
            FetchError::Panicked(_) => "panicked",
        }
    }

    /// Classify an I/O error raised after the connection was established.
    pub(crate) fn from_io(err: io::Error, phase: &'static str) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FetchError::Timeout { phase },
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => FetchError::Reset(err),
            _ => FetchError::Io(err),
        }
    }
}
