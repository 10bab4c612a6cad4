//! Dispatch pool subsystem.
//!
//! # Data Flow
//! ```text
//! Event loop (cache miss)
//!     → job.rs FetchJob { connection, key, job_id }
//!     → pool.rs job queue (unbounded; never blocks the loop)
//!     → worker thread: OriginFetch::fetch
//!         success → ResponseCache::insert
//!     → Completion over the loop's channel (wakes the loop)
//! ```
//!
//! # Design Decisions
//! - Fixed worker count; saturation queues jobs and is only logged
//! - Workers never touch connection buffers; they only send completions
//! - A panicking fetch is caught and reported, the worker keeps running

pub mod job;
pub mod pool;

pub use job::{Completion, FetchJob};
pub use pool::{DispatchError, DispatchPool};
