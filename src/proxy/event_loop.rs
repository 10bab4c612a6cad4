//! Single-threaded readiness loop.

use std::collections::HashMap;
use std::fmt;
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::cache::{CacheDump, LruCapacity, ResponseCache};
use crate::config::ProxyConfig;
use crate::dispatch::{Completion, DispatchError, DispatchPool, FetchJob};
use crate::http::request::{RequestError, RequestHead};
use crate::http::response;
use crate::net::connection::{FlushOutcome, ReadOutcome};
use crate::net::{Connection, ConnectionId, ConnectionState, Listener, ListenerError, Readiness};
use crate::observability::metrics;
use crate::origin::{OriginFetch, TcpOriginFetcher};

/// Upper bound on accepts handled per wakeup so clients already connected
/// are not starved by a connection burst.
const MAX_ACCEPTS_PER_TICK: usize = 64;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to start dispatch pool: {0}")]
    Pool(io::Error),
}

/// Something the loop has to act on.
enum Event {
    Accepted(TcpStream, SocketAddr),
    AcceptFailed(ListenerError),
    Completed(Completion),
    Ready(ConnectionId, Readiness),
    SocketError(ConnectionId, io::Error),
}

/// Why a connection was closed, for logs.
#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    Completed,
    Rejected(RequestError),
    Io(io::Error),
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::Completed => write!(f, "response complete"),
            CloseReason::Rejected(e) => write!(f, "{}", e),
            CloseReason::Io(e) => write!(f, "I/O error: {}", e),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The forwarding proxy: listener, connections, cache and dispatch pool.
pub struct Proxy {
    config: ProxyConfig,
    /// `None` once shutdown has stopped accepting.
    listener: Option<Listener>,
    local_addr: SocketAddr,
    cache: ResponseCache,
    pool: DispatchPool,
    completions: mpsc::UnboundedReceiver<Completion>,
    connections: HashMap<ConnectionId, Connection>,
}

impl Proxy {
    /// Bind the listener and start the dispatch pool with a TCP fetcher.
    pub async fn bind(config: ProxyConfig) -> Result<Self, ProxyError> {
        let fetcher = Arc::new(TcpOriginFetcher::from_config(&config.timeouts));
        Self::bind_with_fetcher(config, fetcher).await
    }

    /// Like `bind`, with a caller-supplied origin fetcher.
    pub async fn bind_with_fetcher(
        config: ProxyConfig,
        fetcher: Arc<dyn OriginFetch>,
    ) -> Result<Self, ProxyError> {
        let listener = Listener::bind(&config.listener).await?;
        let local_addr = listener.local_addr();

        let cache = match config.cache.max_entries {
            Some(capacity) => ResponseCache::with_policy(Arc::new(LruCapacity::new(capacity))),
            None => ResponseCache::new(),
        };

        let (completion_tx, completions) = mpsc::unbounded_channel();
        let pool = DispatchPool::spawn(
            config.dispatch.workers,
            fetcher,
            cache.clone(),
            completion_tx,
        )
        .map_err(ProxyError::Pool)?;

        Ok(Self {
            config,
            listener: Some(listener),
            local_addr,
            cache,
            pool,
            completions,
            connections: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to the shared cache.
    pub fn cache(&self) -> ResponseCache {
        self.cache.clone()
    }

    /// Serve until `shutdown` fires, drain, then return the final cache dump.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<CacheDump, ProxyError> {
        tracing::info!(
            address = %self.local_addr,
            workers = self.pool.size(),
            "Serving"
        );

        loop {
            let events = tokio::select! {
                events = self.next_events() => events,
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            };
            self.handle(events);
        }

        self.drain().await;

        let Proxy {
            config, cache, pool, ..
        } = self;

        if pool.in_flight() == 0 {
            if tokio::task::spawn_blocking(move || pool.join()).await.is_err() {
                tracing::error!("Dispatch pool join panicked");
            }
        } else {
            tracing::warn!(
                in_flight = pool.in_flight(),
                "Abandoning in-flight fetches"
            );
        }

        let dump = cache.dump(config.cache.dump_preview_bytes);
        log_dump(&dump);
        Ok(dump)
    }

    async fn next_events(&mut self) -> Vec<Event> {
        poll_fn(|cx| self.poll_events(cx)).await
    }

    /// One readiness wait across the listener, the completion channel and
    /// every registered connection.
    fn poll_events(&mut self, cx: &mut Context<'_>) -> Poll<Vec<Event>> {
        let mut events = Vec::new();

        if let Some(listener) = &self.listener {
            for _ in 0..MAX_ACCEPTS_PER_TICK {
                match listener.poll_accept(cx) {
                    Poll::Ready(Ok((stream, peer))) => events.push(Event::Accepted(stream, peer)),
                    Poll::Ready(Err(e)) => {
                        events.push(Event::AcceptFailed(e));
                        break;
                    }
                    Poll::Pending => break,
                }
            }
        }

        while let Poll::Ready(Some(completion)) = self.completions.poll_recv(cx) {
            events.push(Event::Completed(completion));
        }

        for (id, conn) in &self.connections {
            match conn.poll_ready(cx) {
                Poll::Ready(Ok(readiness)) => events.push(Event::Ready(*id, readiness)),
                Poll::Ready(Err(e)) => events.push(Event::SocketError(*id, e)),
                Poll::Pending => {}
            }
        }

        if events.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(events)
        }
    }

    fn handle(&mut self, events: Vec<Event>) {
        for event in events {
            match event {
                Event::Accepted(stream, peer) => self.register(stream, peer),
                Event::AcceptFailed(e) => tracing::warn!(error = %e, "Accept failed"),
                Event::Completed(completion) => self.deliver(completion),
                Event::Ready(id, readiness) => self.service(id, readiness),
                Event::SocketError(id, e) => self.close(id, CloseReason::Io(e)),
            }
        }
    }

    fn register(&mut self, stream: TcpStream, peer: SocketAddr) {
        let mut conn = Connection::new(stream, peer, self.config.listener.max_request_bytes);
        conn.transition(ConnectionState::ReadingRequest);
        tracing::info!(connection_id = %conn.id(), peer = %peer, "Accepted connection");

        self.connections.insert(conn.id(), conn);
        metrics::record_connection_accepted();
        metrics::record_active_connections(self.connections.len());
    }

    fn service(&mut self, id: ConnectionId, readiness: Readiness) {
        if readiness.readable {
            let outcome = match self.connections.get_mut(&id) {
                Some(conn) => conn.read_available(),
                None => return,
            };
            match outcome {
                ReadOutcome::Pending => {}
                ReadOutcome::Request(head) => self.route(id, head),
                ReadOutcome::Invalid(e) => self.reject(id, e),
                ReadOutcome::PeerClosed => return self.close(id, CloseReason::PeerClosed),
                ReadOutcome::Failed(e) => return self.close(id, CloseReason::Io(e)),
            }
        }
        if readiness.writable {
            self.flush(id);
        }
    }

    /// Serve a complete request head from cache or hand it to the pool.
    fn route(&mut self, id: ConnectionId, head: RequestHead) {
        let key = match head.resolve() {
            Ok(key) => key,
            Err(e) => return self.reject(id, e),
        };
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };

        if let Some(body) = self.cache.lookup(&key) {
            tracing::info!(connection_id = %id, url = %key, "Cache hit");
            metrics::record_cache_lookup(true);
            conn.transition(ConnectionState::CacheLookup);
            conn.respond(body);
            return self.flush(id);
        }

        tracing::info!(connection_id = %id, url = %key, "Cache miss");
        metrics::record_cache_lookup(false);
        match self.pool.submit(FetchJob::new(id, key)) {
            Ok(()) => {
                conn.transition(ConnectionState::AwaitingFetch);
            }
            Err(DispatchError::Closed(job)) => {
                tracing::warn!(connection_id = %id, url = %job.key, "Pool closed, refusing miss");
                conn.respond(response::service_unavailable());
                self.flush(id);
            }
        }
    }

    fn reject(&mut self, id: ConnectionId, err: RequestError) {
        metrics::record_request_rejected(err.reason());
        if !err.is_rejection() {
            tracing::warn!(connection_id = %id, error = %err, "Dropping malformed request");
            return self.close(id, CloseReason::Rejected(err));
        }

        tracing::info!(connection_id = %id, error = %err, "Rejecting request");
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.respond(response::rejection(&err));
        }
        self.flush(id);
    }

    /// Route a worker's result to the connection that asked for it.
    fn deliver(&mut self, completion: Completion) {
        let Some(conn) = self.connections.get_mut(&completion.connection) else {
            tracing::debug!(
                connection_id = %completion.connection,
                job_id = %completion.job_id,
                "Connection gone, dropping fetch result"
            );
            return;
        };
        if conn.state() != ConnectionState::AwaitingFetch {
            tracing::debug!(
                connection_id = %completion.connection,
                state = ?conn.state(),
                "Connection not awaiting a fetch, dropping result"
            );
            return;
        }

        let response = match &completion.outcome {
            Ok(body) => body.clone(),
            Err(e) => response::fetch_failure(e),
        };
        conn.respond(response);
        self.flush(completion.connection);
    }

    fn flush(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if conn.state() != ConnectionState::WritingResponse {
            return;
        }
        match conn.flush() {
            FlushOutcome::Done => self.close(id, CloseReason::Completed),
            FlushOutcome::Pending => {}
            FlushOutcome::Failed(e) => self.close(id, CloseReason::Io(e)),
        }
    }

    /// Deregister and release the socket. Removing from the map first makes
    /// a second close for the same id a no-op.
    fn close(&mut self, id: ConnectionId, reason: CloseReason) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };
        if conn.close() {
            tracing::info!(
                connection_id = %id,
                peer = %conn.peer_addr(),
                reason = %reason,
                "Closing connection"
            );
        }
        metrics::record_active_connections(self.connections.len());
    }

    /// Stop accepting, let in-flight fetches finish and flush their
    /// responses, bounded by the drain timeout.
    async fn drain(&mut self) {
        if let Some(listener) = self.listener.take() {
            tracing::info!(address = %listener.local_addr(), "Stopped accepting");
        }
        self.pool.close();

        // Requests already buffered in the socket still get an answer; a
        // miss among them is refused by the closed pool. Anything short of a
        // full head is idle and closed.
        let reading: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.state() == ConnectionState::ReadingRequest)
            .map(|(id, _)| *id)
            .collect();
        for id in reading {
            let outcome = match self.connections.get_mut(&id) {
                Some(conn) => conn.read_available(),
                None => continue,
            };
            match outcome {
                ReadOutcome::Request(head) => self.route(id, head),
                ReadOutcome::Invalid(e) => self.reject(id, e),
                ReadOutcome::Failed(e) => self.close(id, CloseReason::Io(e)),
                ReadOutcome::Pending | ReadOutcome::PeerClosed => {
                    self.close(id, CloseReason::Shutdown)
                }
            }
        }

        tracing::info!(
            in_flight = self.pool.in_flight(),
            connections = self.connections.len(),
            "Draining"
        );

        let deadline = self.config.timeouts.drain().map(|d| Instant::now() + d);
        while !self.is_drained() {
            let events = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.next_events()).await {
                        Ok(events) => events,
                        Err(_) => {
                            tracing::warn!("Drain deadline reached");
                            break;
                        }
                    }
                }
                None => self.next_events().await,
            };
            self.handle(events);
        }

        let remaining: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in remaining {
            self.close(id, CloseReason::Shutdown);
        }
    }

    fn is_drained(&self) -> bool {
        self.pool.in_flight() == 0 && self.connections.is_empty()
    }
}

fn log_dump(dump: &CacheDump) {
    tracing::info!(entries = dump.entries.len(), "Current cache content");
    for entry in &dump.entries {
        tracing::info!(
            url = %entry.key.url(),
            bytes = entry.size,
            preview = %entry.preview,
            truncated = entry.truncated,
            "Cached entry"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.listener.port = 0;
        config.dispatch.workers = 1;
        config.timeouts.drain_secs = 2;
        config
    }

    async fn accept_one(proxy: &mut Proxy) -> TcpStream {
        let client = TcpStream::connect(proxy.local_addr()).await.unwrap();
        while proxy.connections.is_empty() {
            let events = proxy.next_events().await;
            proxy.handle(events);
        }
        client
    }

    #[tokio::test]
    async fn buffered_miss_during_drain_is_refused() {
        let mut proxy = Proxy::bind(config()).await.unwrap();
        let mut client = accept_one(&mut proxy).await;

        client
            .write_all(b"GET http://127.0.0.1:9/late HTTP/1.0\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        proxy.drain().await;
        assert!(proxy.connections.is_empty());
        assert!(proxy.cache.is_empty());

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(
            received.starts_with(b"HTTP/1.0 503"),
            "got {:?}",
            String::from_utf8_lossy(&received)
        );
    }

    #[tokio::test]
    async fn partial_request_is_closed_on_drain() {
        let mut proxy = Proxy::bind(config()).await.unwrap();
        let mut client = accept_one(&mut proxy).await;

        client.write_all(b"GET http://127.0.0.1:9/").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        proxy.drain().await;
        assert!(proxy.connections.is_empty());

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }
}
