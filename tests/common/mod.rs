//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use script_bridge::client::{BridgeClient, TokioScheduler};
use script_bridge::config::{ClientConfig, ListenerConfig, SessionConfig};
use script_bridge::server::BridgeServer;
use script_bridge::transport::{ReqwestTransport, RequestOptions, Transport, TransportError};

/// Session timing fast enough for tests: a poll every 20 ms, a session is
/// lost after 400 ms of silence.
pub fn fast_session() -> SessionConfig {
    SessionConfig {
        request_interval_ticks: 2,
        tick_ms: 10,
        timeout_multiplier: 20.0,
        liveness_check_ms: 20,
        request_timeout_ms: 2_000,
        disconnect_wait_ms: 300,
        ping_timeout_ms: 2_000,
    }
}

pub fn client_config(url: &str) -> ClientConfig {
    ClientConfig {
        server_url: url.to_string(),
        client_id: "test-client".to_string(),
        failure_threshold: 3,
        max_reconnect_attempts: 3,
        max_backoff_secs: 1,
        query_timeout_ms: 500,
        request_timeout_ms: 2_000,
        tick_ms: 10,
        backoff_jitter: false,
    }
}

/// Start a server on an ephemeral port. Returns the server and its base URL.
pub async fn start_server(session: SessionConfig) -> (Arc<BridgeServer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = Arc::new(BridgeServer::with_settings(ListenerConfig::default(), session));
    let addr = server.start_with_listener(listener).unwrap();
    (server, format!("http://{addr}"))
}

pub fn client(url: &str) -> BridgeClient {
    BridgeClient::new(client_config(url)).unwrap()
}

pub fn flaky_client(url: &str) -> (BridgeClient, Arc<FlakyTransport>) {
    let config = client_config(url);
    let transport = Arc::new(FlakyTransport::new(url));
    let client = BridgeClient::with_parts(
        config.clone(),
        transport.clone(),
        Arc::new(TokioScheduler::new(config.tick())),
    );
    (client, transport)
}

/// Wraps the real transport and fails a chosen number of polls.
pub struct FlakyTransport {
    inner: ReqwestTransport,
    failing_polls: AtomicU32,
    polls: AtomicU32,
}

impl FlakyTransport {
    pub fn new(url: &str) -> Self {
        Self {
            inner: ReqwestTransport::new(url).unwrap(),
            failing_polls: AtomicU32::new(0),
            polls: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` `GET /query` calls with a 503.
    pub fn fail_next_polls(&self, n: u32) {
        self.failing_polls.store(n, Ordering::SeqCst);
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

impl Transport for FlakyTransport {
    fn get(&self, path: &str, options: RequestOptions) -> BoxFuture<'static, Result<String, TransportError>> {
        if path == "/query" {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let injected = self
                .failing_polls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return async {
                    Err(TransportError::Status {
                        status: 503,
                        body: "injected failure".into(),
                    })
                }
                .boxed();
            }
        }
        self.inner.get(path, options)
    }

    fn post(
        &self,
        path: &str,
        body: String,
        options: RequestOptions,
    ) -> BoxFuture<'static, Result<String, TransportError>> {
        self.inner.post(path, body, options)
    }

    fn cancel_all(&self, reason: &str) {
        self.inner.cancel_all(reason);
    }
}

/// Receive events until one matches, or panic after `timeout`.
pub async fn next_event<E, F>(rx: &mut broadcast::Receiver<E>, timeout: Duration, mut matches: F) -> E
where
    E: Clone + std::fmt::Debug,
    F: FnMut(&E) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .expect("timed out waiting for event")
}

/// Poll `condition` every 10 ms until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
