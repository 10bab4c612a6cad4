//! Units of work and their results.

use bytes::Bytes;
use uuid::Uuid;

use crate::cache::CacheKey;
use crate::net::connection::ConnectionId;
use crate::origin::{FetchError, OriginTarget};

/// One pending origin fetch, tagged with the connection that wants it.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub job_id: Uuid,
    pub connection: ConnectionId,
    pub key: CacheKey,
    pub target: OriginTarget,
}

impl FetchJob {
    pub fn new(connection: ConnectionId, key: CacheKey) -> Self {
        let target = OriginTarget::from(&key);
        Self {
            job_id: Uuid::new_v4(),
            connection,
            key,
            target,
        }
    }
}

/// Result of a job, routed back to the event loop.
#[derive(Debug)]
pub struct Completion {
    pub job_id: Uuid,
    pub connection: ConnectionId,
    pub key: CacheKey,
    pub outcome: Result<Bytes, FetchError>,
}
