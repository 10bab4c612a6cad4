//! HTTP surface of the proxy.
//!
//! # Data Flow
//! ```text
//! Connection input buffer
//!     → request.rs (wait for \r\n\r\n, split request line, resolve target)
//!     → CacheKey for GET, RequestError otherwise
//!
//! response.rs
//!     → fixed bytes for rejections, fetch failures and shutdown refusals
//! ```
//!
//! # Design Decisions
//! - Only the request line and Host header are parsed; the rest is ignored
//! - Malformed input fails closed (no response), unsupported input gets 501
//! - Proxy-generated responses are HTTP/1.0 with `Connection: close`

pub mod request;
pub mod response;

pub use request::{parse_head, ParseStatus, RequestError, RequestHead};
