//! Proxy engine.
//!
//! # Data Flow
//! ```text
//! readiness wait (listener, client sockets, completion channel)
//!     → accept        → register Connection (ReadingRequest)
//!     → readable      → Connection::read_available → route
//!         hit   → output buffer filled on the loop thread
//!         miss  → FetchJob → DispatchPool
//!     → completion    → output buffer of the originating connection
//!     → writable      → Connection::flush → close when drained
//! ```
//!
//! # Design Decisions
//! - One `Proxy` value owns the listener, connections, cache handle and pool;
//!   there is no process-wide state
//! - The loop is the only code that reads or writes client sockets
//! - Completions for connections that already closed are dropped quietly

pub mod event_loop;

pub use event_loop::{Proxy, ProxyError};
