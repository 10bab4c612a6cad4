//! Origin fetch subsystem.
//!
//! # Data Flow
//! ```text
//! FetchJob (worker thread)
//!     → fetcher.rs resolve host:port
//!     → connect (connect timeout)
//!     → send `GET <path> HTTP/1.0` + Host
//!     → read until the origin closes (per-I/O timeout)
//!     → raw response bytes | FetchError
//! ```
//!
//! # Design Decisions
//! - HTTP/1.0 makes connection close the end-of-response signal
//! - Blocking sockets: fetches only ever run on dispatch workers
//! - Every failure mode is a distinct error; an empty body is a failure

pub mod error;
pub mod fetcher;

pub use error::FetchError;
pub use fetcher::{OriginFetch, OriginTarget, TcpOriginFetcher};
