//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Request target
//!     → key.rs (normalize into CacheKey)
//!     → store.rs lookup (event loop thread)
//!         hit  → bytes copied into the connection's output buffer
//!         miss → FetchJob → dispatch pool → store.rs insert (worker thread)
//!     → eviction.rs consulted on insert / hit
//! ```
//!
//! # Design Decisions
//! - Entries are whole `Bytes` values; no partial entries are ever visible
//! - Failures are never cached
//! - Unbounded by default; capacity bound is opt-in

pub mod eviction;
pub mod key;
pub mod store;

pub use eviction::{EvictionPolicy, LruCapacity, Unbounded};
pub use key::CacheKey;
pub use store::{CacheDump, DumpEntry, ResponseCache};
