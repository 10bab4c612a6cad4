//! Caching forward HTTP proxy library.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod origin;
pub mod proxy;

pub use cache::{CacheKey, ResponseCache};
pub use config::ProxyConfig;
pub use lifecycle::Shutdown;
pub use proxy::{Proxy, ProxyError};
