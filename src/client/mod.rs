//! Client side of the bridge.
//!
//! # Data Flow
//! ```text
//! connect()  → GET /new → POST /query (script-bridge:connect) → Connected
//! every requestIntervalTicks:
//!            GET /query → [ServerRequest...] → Dispatcher → POST /query (ClientResponse)
//! send()     → POST /query (ClientRequest) → ServerResponse
//! ```
//!
//! # Design Decisions
//! - Transport and scheduler are traits so a host can supply its own
//! - A run of failed polls ends a session, a single failure does not
//! - Version mismatches are terminal; everything else reconnects with backoff

pub mod events;
mod internal;
mod poll;
pub mod scheduler;
pub mod state;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::ClientConfig;
use crate::dispatch::{Dispatcher, Handler};
use crate::events::EventBus;
use crate::protocol::actions::epoch_millis;
use crate::protocol::channel::internal as internal_channel;
use crate::protocol::{
    ChannelId, ChannelIdError, ClientRequest, ConnectRequest, DecodeError, DisconnectNotice,
    DisconnectReason, ErrorReason, IntoChannelId, Outcome, PingReply, PingRequest, ServerResponse,
    SessionCreated, SessionId, PROTOCOL_VERSION,
};
use crate::resilience::{reconnect_delay, reconnect_delay_with_jitter};
use crate::transport::{ReqwestTransport, RequestOptions, Transport, TransportError};

pub use events::{ClientEvent, ClientEventKind};
pub use scheduler::{RepeatingTask, ScheduledTask, Scheduler, Ticks, TokioScheduler};
pub use state::ConnectionState;

use state::ClientState;

/// Poll round-trips kept for [`BridgeClient::average_ping`].
const LATENCY_WINDOW: usize = 10;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Channel(#[from] ChannelIdError),

    #[error("no active session")]
    NoActiveSession,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("server refused a new session ({reason}): {message}")]
    SessionRejected { reason: ErrorReason, message: String },

    #[error("handshake rejected ({reason}): {message}")]
    HandshakeRejected { reason: ErrorReason, message: String },

    #[error("gave up after {attempts} connection attempts: {last_error}")]
    ReconnectExhausted {
        attempts: u32,
        last_error: Box<ClientError>,
    },

    #[error("ping failed ({reason}): {message}")]
    PingFailed { reason: ErrorReason, message: String },

    #[error("connection attempt cancelled")]
    Cancelled,
}

/// Context handed to client handlers along with each server request.
#[derive(Clone)]
pub struct RequestContext {
    session_id: SessionId,
    client: Weak<ClientInner>,
}

impl RequestContext {
    /// Session the request was delivered on.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The receiving client, while it is alive.
    pub fn client(&self) -> Option<BridgeClient> {
        self.inner().map(|inner| BridgeClient { inner })
    }

    pub(crate) fn inner(&self) -> Option<Arc<ClientInner>> {
        self.client.upgrade()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("session_id", &self.session_id)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    dispatcher: Dispatcher<RequestContext>,
    events: EventBus<ClientEvent>,
    state: Mutex<ClientState>,
    latencies: Mutex<VecDeque<Duration>>,
}

/// A bridge client: one logical connection to a server, kept alive by
/// polling and re-established when lost.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<ClientInner>,
}

impl BridgeClient {
    /// Client on the default HTTP transport and tokio scheduler.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(&config.server_url)?;
        let scheduler = TokioScheduler::new(config.tick());
        Ok(Self::with_parts(config, Arc::new(transport), Arc::new(scheduler)))
    }

    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let dispatcher = Dispatcher::new("client");
        internal::register(&dispatcher);

        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                scheduler,
                dispatcher,
                events: EventBus::new(),
                state: Mutex::new(ClientState::default()),
                latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            }),
        }
    }

    /// Establish a session. Retries with backoff until connected or the
    /// attempt ceiling is reached.
    ///
    /// A no-op while reconnecting, and also while connected: the live
    /// session is kept, so the server never holds an orphan for it. Call
    /// [`disconnect`](Self::disconnect) first to replace the session.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner.connect().await
    }

    /// Tell the server the session is over, then tear down locally.
    ///
    /// The notice is best effort and bounded by the request timeout.
    pub async fn disconnect(&self, reason: DisconnectReason) -> Result<(), ClientError> {
        self.inner.disconnect(reason).await
    }

    /// Tear down local state without notifying anyone.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    /// Send a request to the server and wait for its response.
    ///
    /// Application channels need an established connection; the reserved
    /// namespace only needs a session id.
    pub async fn send(&self, channel: impl IntoChannelId, data: Value) -> Result<ServerResponse, ClientError> {
        let channel_id = channel.into_channel_id()?;
        let session_id = {
            let state = self.inner.state();
            match state.session_id {
                Some(id) if channel_id.is_internal() || state.phase == ConnectionState::Connected => id,
                _ => return Err(ClientError::NoActiveSession),
            }
        };
        self.inner.post_request(channel_id, session_id, data).await
    }

    /// Measure the round trip to the server with an internal ping.
    pub async fn ping(&self) -> Result<Duration, ClientError> {
        let data = serde_json::to_value(PingRequest {
            sent_at: epoch_millis(),
        })
        .map_err(ClientError::Encode)?;
        let start = Instant::now();
        let response = self
            .send(ChannelId::internal(internal_channel::PING), data)
            .await?;

        match response.outcome {
            Outcome::Success(data) => {
                let reply: PingReply = serde_json::from_value(data).map_err(DecodeError::from)?;
                tracing::trace!(received_at = reply.received_at, "Ping reply");
                Ok(start.elapsed())
            }
            Outcome::Failure { message, reason } => Err(ClientError::PingFailed { reason, message }),
        }
    }

    /// Register a handler for server → client requests.
    pub fn register_handler<H>(&self, channel: impl IntoChannelId, handler: H) -> Result<(), ChannelIdError>
    where
        H: Handler<RequestContext>,
    {
        self.inner.dispatcher.register(channel, handler)
    }

    pub fn unregister_handler(&self, channel_id: &str) -> bool {
        self.inner.dispatcher.unregister(channel_id)
    }

    pub fn events(&self) -> &EventBus<ClientEvent> {
        &self.inner.events
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state().phase
    }

    /// Id of the current session, once connected.
    pub fn session_id(&self) -> Option<SessionId> {
        let state = self.inner.state();
        match state.phase {
            ConnectionState::Connected => state.session_id,
            _ => None,
        }
    }

    /// Mean of the last few poll round-trips.
    pub fn average_ping(&self) -> Option<Duration> {
        let latencies = lock(&self.inner.latencies);
        if latencies.is_empty() {
            return None;
        }
        let total: Duration = latencies.iter().sum();
        Some(total / latencies.len() as u32)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("BridgeClient")
            .field("client_id", &self.inner.config.client_id)
            .field("state", &state.phase)
            .field("session_id", &state.session_id)
            .finish()
    }
}

impl ClientInner {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        lock(&self.state)
    }

    async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        if !self.state().begin_connect() {
            tracing::debug!("Connect ignored; already connected or connecting");
            return Ok(());
        }

        loop {
            let error = match self.establish().await {
                Ok(created) => return self.finish_connect(created),
                Err(error) => error,
            };

            let attempts = {
                let mut state = self.state();
                if state.phase != ConnectionState::Reconnecting {
                    return Err(ClientError::Cancelled);
                }
                if state.attempts >= self.config.max_reconnect_attempts {
                    let attempts = state.attempts;
                    state.give_up();
                    drop(state);
                    tracing::error!(attempts, error = %error, "Giving up on connecting");
                    return Err(ClientError::ReconnectExhausted {
                        attempts,
                        last_error: Box::new(error),
                    });
                }
                state.attempts
            };

            let delay = if self.config.backoff_jitter {
                reconnect_delay_with_jitter(attempts, self.config.max_backoff_secs)
            } else {
                reconnect_delay(attempts, self.config.max_backoff_secs)
            };
            tracing::warn!(
                attempt = attempts + 1,
                retry_in = ?delay,
                error = %error,
                "Connection attempt failed"
            );
            self.wait_for_retry(delay).await?;
        }
    }

    /// `GET /new` followed by the version handshake.
    async fn establish(&self) -> Result<SessionCreated, ClientError> {
        let options = RequestOptions::new().timeout(self.config.query_timeout());
        let body = self.transport.get("/new", options).await?;
        let created: SessionCreated = match ServerResponse::decode(&body)?.outcome {
            Outcome::Success(data) => serde_json::from_value(data).map_err(DecodeError::from)?,
            Outcome::Failure { message, reason } => {
                return Err(ClientError::SessionRejected { reason, message })
            }
        };

        let handshake = ConnectRequest {
            client_id: self.config.client_id.clone(),
            protocol_version: PROTOCOL_VERSION,
        };
        let data = serde_json::to_value(handshake).map_err(ClientError::Encode)?;
        let response = self
            .post_request(ChannelId::internal(internal_channel::CONNECT), created.session_id, data)
            .await?;
        if let Outcome::Failure { message, reason } = response.outcome {
            return Err(ClientError::HandshakeRejected { reason, message });
        }
        Ok(created)
    }

    fn finish_connect(self: &Arc<Self>, created: SessionCreated) -> Result<(), ClientError> {
        let poll = self.start_polling(created.request_interval_ticks);
        {
            let mut state = self.state();
            if state.phase != ConnectionState::Reconnecting {
                poll.cancel();
                return Err(ClientError::Cancelled);
            }
            state.connected(created.session_id, poll);
        }
        self.clear_latencies();

        tracing::info!(
            session_id = %created.session_id,
            request_interval_ticks = created.request_interval_ticks,
            "Connected"
        );
        self.events.emit(ClientEvent::Connect {
            session_id: created.session_id,
        });
        Ok(())
    }

    async fn wait_for_retry(&self, delay: Duration) -> Result<(), ClientError> {
        let (fire, fired) = oneshot::channel::<()>();
        let task = self.scheduler.schedule_once(
            self.scheduler.ticks_from(delay),
            async move {
                let _ = fire.send(());
            }
            .boxed(),
        );

        {
            let mut state = self.state();
            if state.phase != ConnectionState::Reconnecting {
                task.cancel();
                return Err(ClientError::Cancelled);
            }
            state.retry_scheduled(task);
            state.attempts += 1;
        }

        fired.await.map_err(|_| ClientError::Cancelled)?;
        let still_connecting = self.state().phase == ConnectionState::Reconnecting;
        if still_connecting {
            Ok(())
        } else {
            Err(ClientError::Cancelled)
        }
    }

    async fn post_request(
        &self,
        channel_id: ChannelId,
        session_id: SessionId,
        data: Value,
    ) -> Result<ServerResponse, ClientError> {
        let request = ClientRequest::new(channel_id, session_id, data);
        let body = serde_json::to_string(&request).map_err(ClientError::Encode)?;
        let options = RequestOptions::new().timeout(self.config.request_timeout());
        let reply = self.transport.post("/query", body, options).await?;
        Ok(ServerResponse::decode(&reply)?)
    }

    async fn disconnect(&self, reason: DisconnectReason) -> Result<(), ClientError> {
        let session_id = {
            let mut state = self.state();
            match state.session_id {
                Some(id) => id,
                None => {
                    // Also stops a reconnect in progress.
                    state.teardown();
                    return Err(ClientError::NoActiveSession);
                }
            }
        };

        match serde_json::to_value(DisconnectNotice::new(reason)) {
            Ok(data) => {
                let notice = self.post_request(
                    ChannelId::internal(internal_channel::DISCONNECT),
                    session_id,
                    data,
                );
                match tokio::time::timeout(self.config.request_timeout(), notice).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Disconnect notice not delivered")
                    }
                    Err(_) => tracing::warn!(session_id = %session_id, "Disconnect notice timed out"),
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode disconnect notice"),
        }

        self.transport.cancel_all(reason.as_str());
        let was_active = self.state().session_id == Some(session_id);
        self.destroy();
        if was_active {
            tracing::info!(session_id = %session_id, reason = %reason, "Disconnected");
            self.events.emit(ClientEvent::Disconnect { reason });
        }
        Ok(())
    }

    fn destroy(&self) {
        let session_id = self.state().teardown();
        self.clear_latencies();
        if let Some(session_id) = session_id {
            tracing::debug!(session_id = %session_id, "Client state destroyed");
        }
    }

    /// The server ended `session_id`.
    pub(crate) fn server_disconnected(&self, session_id: SessionId, reason: DisconnectReason) {
        {
            let mut state = self.state();
            if state.session_id != Some(session_id) {
                return;
            }
            state.teardown();
        }
        self.clear_latencies();
        self.events.emit(ClientEvent::Disconnect { reason });
    }

    fn record_latency(&self, sample: Duration) {
        let mut latencies = lock(&self.latencies);
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(sample);
    }

    fn clear_latencies(&self) {
        lock(&self.latencies).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Action;
    use crate::protocol::{ClientMessage, RequestId, ServerRequest};
    use futures_util::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that fails every call and counts them.
    #[derive(Default)]
    struct DeadTransport {
        calls: AtomicUsize,
    }

    impl Transport for DeadTransport {
        fn get(&self, _path: &str, _options: RequestOptions) -> BoxFuture<'static, Result<String, TransportError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Request("connection refused".into())) }.boxed()
        }

        fn post(
            &self,
            _path: &str,
            _body: String,
            _options: RequestOptions,
        ) -> BoxFuture<'static, Result<String, TransportError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Request("connection refused".into())) }.boxed()
        }

        fn cancel_all(&self, _reason: &str) {}
    }

    fn client(transport: Arc<DeadTransport>, max_attempts: u32) -> BridgeClient {
        let config = ClientConfig {
            max_reconnect_attempts: max_attempts,
            ..ClientConfig::default()
        };
        // A 1 ms tick turns the 1 s, 2 s backoff into a few milliseconds of ticks.
        BridgeClient::with_parts(config, transport, Arc::new(FastScheduler))
    }

    /// Scheduler whose ticks are a thousand times shorter than they claim.
    struct FastScheduler;

    impl Scheduler for FastScheduler {
        fn ticks_per_second(&self) -> f64 {
            1.0
        }

        fn schedule_repeating(&self, every: Ticks, task: RepeatingTask) -> ScheduledTask {
            TokioScheduler::new(Duration::from_millis(1)).schedule_repeating(every, task)
        }

        fn schedule_once(&self, after: Ticks, task: BoxFuture<'static, ()>) -> ScheduledTask {
            TokioScheduler::new(Duration::from_millis(1)).schedule_once(after, task)
        }
    }

    /// Server double: hands out one session, accepts the handshake and
    /// delivers a disconnect notice on the first poll.
    struct NoticeServer {
        session_id: SessionId,
        notice: Mutex<Option<ServerRequest>>,
        sessions_opened: AtomicUsize,
        acks: AtomicUsize,
    }

    impl NoticeServer {
        fn new(reason: DisconnectReason) -> Self {
            let data = serde_json::to_value(DisconnectNotice::new(reason)).unwrap();
            let notice = ServerRequest::new(
                ChannelId::internal(internal_channel::DISCONNECT),
                RequestId::new(),
                data,
            );
            Self {
                session_id: SessionId::new(),
                notice: Mutex::new(Some(notice)),
                sessions_opened: AtomicUsize::new(0),
                acks: AtomicUsize::new(0),
            }
        }
    }

    impl Transport for NoticeServer {
        fn get(&self, path: &str, _options: RequestOptions) -> BoxFuture<'static, Result<String, TransportError>> {
            let body = if path == "/new" {
                self.sessions_opened.fetch_add(1, Ordering::SeqCst);
                let created = json!({"sessionId": self.session_id, "requestIntervalTicks": 1});
                serde_json::to_string(&ServerResponse::success(created)).unwrap()
            } else {
                let batch: Vec<ServerRequest> = lock(&self.notice).take().into_iter().collect();
                serde_json::to_string(&batch).unwrap()
            };
            async move { Ok(body) }.boxed()
        }

        fn post(
            &self,
            _path: &str,
            body: String,
            _options: RequestOptions,
        ) -> BoxFuture<'static, Result<String, TransportError>> {
            let reply = match ClientMessage::decode(body.as_bytes()).unwrap() {
                ClientMessage::Request(_) => serde_json::to_string(&ServerResponse::success(Value::Null)).unwrap(),
                ClientMessage::Response(_) => {
                    self.acks.fetch_add(1, Ordering::SeqCst);
                    String::new()
                }
            };
            async move { Ok(reply) }.boxed()
        }

        fn cancel_all(&self, _reason: &str) {}
    }

    #[tokio::test]
    async fn test_version_notice_is_final() {
        for reason in [DisconnectReason::OutdatedClient, DisconnectReason::OutdatedServer] {
            let server = Arc::new(NoticeServer::new(reason));
            let client = BridgeClient::with_parts(ClientConfig::default(), server.clone(), Arc::new(FastScheduler));
            let mut events = client.events().subscribe();

            client.connect().await.unwrap();
            assert!(matches!(events.recv().await.unwrap(), ClientEvent::Connect { .. }));

            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event, ClientEvent::Disconnect { reason });

            // No reconnect follows a version mismatch.
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(client.state(), ConnectionState::Disconnected);
            assert!(client.session_id().is_none());
            assert_eq!(server.sessions_opened.load(Ordering::SeqCst), 1);
            assert_eq!(server.acks.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_send_validates_before_io() {
        let transport = Arc::new(DeadTransport::default());
        let client = client(transport.clone(), 0);

        let result = client.send("nonamespace", json!({})).await;
        assert!(matches!(result, Err(ClientError::Channel(ChannelIdError::NamespaceRequired(_)))));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let transport = Arc::new(DeadTransport::default());
        let client = client(transport.clone(), 0);

        let result = client.send("app:echo", json!({})).await;
        assert!(matches!(result, Err(ClientError::NoActiveSession)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_max_attempts() {
        let transport = Arc::new(DeadTransport::default());
        let client = client(transport.clone(), 2);

        let result = client.connect().await;
        match result {
            Err(ClientError::ReconnectExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last_error, ClientError::Transport(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
        // Initial attempt plus two retries, each a single GET /new.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_destroy_cancels_reconnect() {
        let transport = Arc::new(DeadTransport::default());
        let config = ClientConfig {
            max_reconnect_attempts: 5,
            ..ClientConfig::default()
        };
        // Real one-second backoff; destroy lands while the retry is pending.
        let client = BridgeClient::with_parts(
            config,
            transport,
            Arc::new(TokioScheduler::new(Duration::from_millis(10))),
        );

        let c = client.clone();
        let connecting = tokio::spawn(async move { c.connect().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        client.destroy();
        let result = tokio::time::timeout(Duration::from_secs(2), connecting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_register_handler_rejects_reserved() {
        let client = client(Arc::new(DeadTransport::default()), 0);
        let result = client.register_handler("script-bridge:ping", |_a: Action<RequestContext>| async { Ok(()) });
        assert!(matches!(result, Err(ChannelIdError::ReservedNamespace(_))));
        assert!(client
            .register_handler("app:echo", |_a: Action<RequestContext>| async { Ok(()) })
            .is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_without_session() {
        let client = client(Arc::new(DeadTransport::default()), 0);
        assert!(matches!(
            client.disconnect(DisconnectReason::Disconnect).await,
            Err(ClientError::NoActiveSession)
        ));
        assert!(client.average_ping().is_none());
        assert!(client.session_id().is_none());
    }
}
