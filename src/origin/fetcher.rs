//! Blocking origin fetcher.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;

use crate::cache::CacheKey;
use crate::config::TimeoutConfig;
use crate::origin::error::FetchError;

/// Where a fetch goes and what it asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginTarget {
    /// Host as written in the URL; IPv6 literals keep their brackets.
    pub host: String,
    pub port: u16,
    /// Path including the normalized query string.
    pub path: String,
}

impl OriginTarget {
    /// Minimal HTTP/1.0 request sent to the origin.
    pub fn request_bytes(&self) -> Vec<u8> {
        format!("GET {} HTTP/1.0\r\nHost: {}\r\n\r\n", self.path, self.host).into_bytes()
    }

    /// Host in the form the resolver accepts: `[::1]` becomes `::1`.
    pub fn socket_host(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }
}

impl From<&CacheKey> for OriginTarget {
    fn from(key: &CacheKey) -> Self {
        Self {
            host: key.host().to_string(),
            port: key.port(),
            path: key.path_and_query(),
        }
    }
}

impl std::fmt::Display for OriginTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

/// Performs one blocking request/response cycle against an origin.
pub trait OriginFetch: Send + Sync {
    fn fetch(&self, target: &OriginTarget) -> Result<Bytes, FetchError>;
}

/// Fetcher over plain blocking TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpOriginFetcher {
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl TcpOriginFetcher {
    pub fn new(connect_timeout: Option<Duration>, io_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    pub fn from_config(timeouts: &TimeoutConfig) -> Self {
        Self::new(timeouts.connect(), timeouts.io())
    }

    fn connect(&self, target: &OriginTarget) -> Result<TcpStream, FetchError> {
        let addrs: Vec<SocketAddr> = (target.socket_host(), target.port)
            .to_socket_addrs()
            .map_err(|source| FetchError::Resolve {
                host: target.host.clone(),
                source,
            })?
            .collect();

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
        if addrs.is_empty() {
            return Err(FetchError::Resolve {
                host: target.host.clone(),
                source: last_err,
            });
        }

        for addr in addrs {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!(addr = %addr, error = %e, "Origin connect attempt failed");
                    last_err = e;
                }
            }
        }

        if last_err.kind() == io::ErrorKind::TimedOut {
            return Err(FetchError::Timeout { phase: "connect" });
        }
        Err(FetchError::Unreachable {
            target: format!("{}:{}", target.host, target.port),
            source: last_err,
        })
    }
}

impl OriginFetch for TcpOriginFetcher {
    fn fetch(&self, target: &OriginTarget) -> Result<Bytes, FetchError> {
        let mut stream = self.connect(target)?;
        stream
            .set_read_timeout(self.io_timeout)
            .and_then(|_| stream.set_write_timeout(self.io_timeout))
            .map_err(FetchError::Io)?;

        stream
            .write_all(&target.request_bytes())
            .map_err(|e| FetchError::from_io(e, "write"))?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .map_err(|e| FetchError::from_io(e, "read"))?;

        if response.is_empty() {
            return Err(FetchError::EmptyResponse);
        }
        Ok(Bytes::from(response))
    }
}
