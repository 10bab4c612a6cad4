//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, non-blocking accept polled by the event loop)
//!     → connection.rs (buffers + state machine, one per client socket)
//!
//! Connection States:
//!     Accepted → ReadingRequest → {CacheLookup | AwaitingFetch}
//!         → WritingResponse → Closed
//! ```
//!
//! # Design Decisions
//! - Sockets are only read and written by the event loop thread
//! - All I/O is `try_read`/`try_write` after a readiness notification
//! - `Closed` is terminal; the state guard makes double-close a no-op

pub mod connection;
pub mod listener;

pub use connection::{Connection, ConnectionId, ConnectionState, Readiness};
pub use listener::{Listener, ListenerError};
