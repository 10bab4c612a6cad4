//! Connection state machine and buffers.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing and completion routing
//! - Accumulate request bytes until the head is complete
//! - Hold the response bytes and drain them as the socket accepts writes
//! - Guard lifecycle transitions so `Closed` is entered exactly once

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::net::TcpStream;

use crate::http::request::{parse_head, ParseStatus, RequestError, RequestHead};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

const READ_CHUNK: usize = 4096;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, not yet registered for reads.
    Accepted,
    /// Collecting bytes until the request head is complete.
    ReadingRequest,
    /// Request served from cache on the loop thread.
    CacheLookup,
    /// Fetch job submitted; no output until its completion arrives.
    AwaitingFetch,
    /// Draining the output buffer.
    WritingResponse,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether `self → next` is a legal lifecycle step.
    pub fn can_transition(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Accepted, ReadingRequest)
            | (ReadingRequest, CacheLookup)
            | (ReadingRequest, AwaitingFetch)
            | (ReadingRequest, WritingResponse)
            | (CacheLookup, WritingResponse)
            | (AwaitingFetch, WritingResponse) => true,
            _ => false,
        }
    }
}

/// Readiness mask for one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    pub const NONE: Readiness = Readiness {
        readable: false,
        writable: false,
    };

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// What a read pass produced.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Nothing actionable yet.
    Pending,
    /// The request head is complete.
    Request(RequestHead),
    /// The head is complete but unusable, or too large.
    Invalid(RequestError),
    /// Zero-length read.
    PeerClosed,
    Failed(io::Error),
}

/// What a write pass produced.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Output buffer fully written.
    Done,
    /// Socket would block; wait for writability.
    Pending,
    Failed(io::Error),
}

/// One accepted client socket. Owned by the event loop.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    stream: TcpStream,
    inbound: Vec<u8>,
    outbound: Bytes,
    state: ConnectionState,
    max_request_bytes: usize,
}

impl Connection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, max_request_bytes: usize) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            stream,
            inbound: Vec::new(),
            outbound: Bytes::new(),
            state: ConnectionState::Accepted,
            max_request_bytes,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`, refusing illegal steps. Returns whether the state changed.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition(next) {
            tracing::error!(
                connection_id = %self.id,
                from = ?self.state,
                to = ?next,
                "Illegal connection state transition"
            );
            return false;
        }
        tracing::trace!(connection_id = %self.id, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
        true
    }

    /// Which readiness the event loop should wait for in the current state.
    pub fn interest(&self) -> Readiness {
        match self.state {
            ConnectionState::ReadingRequest | ConnectionState::AwaitingFetch => Readiness {
                readable: true,
                writable: false,
            },
            ConnectionState::WritingResponse => Readiness {
                readable: false,
                writable: true,
            },
            _ => Readiness::NONE,
        }
    }

    /// Poll the socket for the readiness this state cares about.
    pub fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<Readiness>> {
        let interest = self.interest();
        let mut ready = Readiness::NONE;

        if interest.readable {
            match self.stream.poll_read_ready(cx) {
                Poll::Ready(Ok(())) => ready.readable = true,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {}
            }
        }
        if interest.writable {
            match self.stream.poll_write_ready(cx) {
                Poll::Ready(Ok(())) => ready.writable = true,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {}
            }
        }

        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(Ok(ready))
        }
    }

    /// Drain readable bytes. While reading the request they are appended to
    /// the input buffer and parsed once the terminator arrives; in later
    /// states they are discarded and only EOF matters.
    pub fn read_available(&mut self) -> ReadOutcome {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.stream.try_read(&mut buf) {
                Ok(0) => return ReadOutcome::PeerClosed,
                Ok(n) => {
                    if self.state != ConnectionState::ReadingRequest {
                        continue;
                    }
                    self.inbound.extend_from_slice(&buf[..n]);
                    match parse_head(&self.inbound, self.max_request_bytes) {
                        Ok(ParseStatus::Incomplete) => {}
                        Ok(ParseStatus::Complete(head)) => return ReadOutcome::Request(head),
                        Err(e) => return ReadOutcome::Invalid(e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Pending,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }

    /// Install the response and move to `WritingResponse`.
    pub fn respond(&mut self, response: Bytes) -> bool {
        if !self.transition(ConnectionState::WritingResponse) {
            return false;
        }
        self.inbound.clear();
        self.outbound = response;
        true
    }

    /// Write as much of the output buffer as the socket takes.
    pub fn flush(&mut self) -> FlushOutcome {
        while !self.outbound.is_empty() {
            match self.stream.try_write(&self.outbound) {
                Ok(0) => return FlushOutcome::Failed(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.outbound.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return FlushOutcome::Pending,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return FlushOutcome::Failed(e),
            }
        }
        FlushOutcome::Done
    }

    /// Enter `Closed`. Returns false if already closed. The socket itself is
    /// released when the connection is dropped.
    pub fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;
        self.outbound.clear();
        true
    }
}
