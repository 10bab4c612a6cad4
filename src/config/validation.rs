//! Configuration validation.
//!
//! Pure function over `ProxyConfig`; reports every problem, not just the first.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError {
            field: "listener.host",
            message: "must not be empty".into(),
        });
    }
    if config.listener.max_request_bytes == 0 {
        errors.push(ValidationError {
            field: "listener.max_request_bytes",
            message: "must be greater than 0".into(),
        });
    }
    if config.dispatch.workers == 0 {
        errors.push(ValidationError {
            field: "dispatch.workers",
            message: "must be at least 1".into(),
        });
    }
    if config.cache.max_entries == Some(0) {
        errors.push(ValidationError {
            field: "cache.max_entries",
            message: "must be greater than 0 when set".into(),
        });
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError {
            field: "observability.metrics_address",
            message: format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
