//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use caching_proxy::cache::CacheDump;
use caching_proxy::{Proxy, ProxyConfig, ProxyError, ResponseCache, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Mock origin that counts the connections it receives.
pub struct MockOrigin {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockOrigin {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start an origin that answers every request with `body` after `delay`.
pub async fn start_origin(body: &'static str, delay: Duration) -> MockOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let mut request = Vec::new();
                        let mut buf = [0u8; 1024];
                        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => request.extend_from_slice(&buf[..n]),
                            }
                        }
                        tokio::time::sleep(delay).await;
                        let response = format!(
                            "HTTP/1.0 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockOrigin { addr, hits }
}

/// A running proxy on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub cache: ResponseCache,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<CacheDump, ProxyError>>,
}

impl TestProxy {
    /// Trigger shutdown and wait for the final cache dump.
    pub async fn stop(self) -> CacheDump {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("proxy did not shut down")
            .unwrap()
            .unwrap()
    }
}

pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.port = 0;
    config.dispatch.workers = 2;
    config.timeouts.connect_secs = 2;
    config.timeouts.io_secs = 5;
    config.timeouts.drain_secs = 5;
    config
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let proxy = Proxy::bind(config).await.unwrap();
    let addr = proxy.local_addr();
    let cache = proxy.cache();
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    let handle = tokio::spawn(proxy.run(receiver));

    TestProxy {
        addr,
        cache,
        shutdown,
        handle,
    }
}

/// Send raw bytes and read until the proxy closes the connection.
pub async fn send_raw(addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("proxy left the connection open")
        .unwrap();
    response
}

pub async fn get(addr: SocketAddr, url: &str) -> Vec<u8> {
    send_raw(addr, format!("GET {} HTTP/1.0\r\n\r\n", url).as_bytes()).await
}

/// Poll until `check` holds or a second passes.
#[allow(dead_code)]
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
