//! Server-side state of one connected client.
//!
//! # Responsibilities
//! - Queue server → client requests until the next poll drains them
//! - Correlate responses with pending requests, with a deadline per request
//! - Track poll arrival for liveness and round-trip samples for ping
//! - Tear down exactly once, aborting everything still in flight

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::protocol::actions::epoch_millis;
use crate::protocol::channel::internal;
use crate::protocol::{
    ChannelId, ChannelIdError, ClientResponse, DisconnectNotice, DisconnectReason, ErrorReason,
    IntoChannelId, Outcome, PingReply, PingRequest, RequestId, ServerRequest, SessionId,
};
use crate::server::events::{BridgeError, ServerEvent};
use crate::server::liveness;
use crate::server::pending::PendingResponses;
use crate::server::ServerCore;

/// Round-trip samples kept for [`Session::average_ping`].
const LATENCY_WINDOW: usize = 10;

#[derive(Debug, Error)]
pub enum PingError {
    #[error("ping failed ({reason}): {message}")]
    Failed { reason: ErrorReason, message: String },

    #[error("malformed ping reply: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result of [`Session::ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingResult {
    /// Enqueue to response, as measured by the server.
    pub round_trip: Duration,
    /// Server send time to client receive time, across both clocks.
    pub to_client: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct Session {
    id: SessionId,
    core: Weak<ServerCore>,
    client_id: Mutex<Option<String>>,
    queue: Mutex<Vec<ServerRequest>>,
    pending: PendingResponses,
    latencies: Mutex<VecDeque<Duration>>,
    last_poll: Mutex<Instant>,
    liveness: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
    disconnecting: AtomicBool,
}

impl Session {
    /// Allocate a session and register it with the server.
    pub(crate) fn create(core: &Arc<ServerCore>) -> Arc<Self> {
        let session = Arc::new(Self {
            id: SessionId::new(),
            core: Arc::downgrade(core),
            client_id: Mutex::new(None),
            queue: Mutex::new(Vec::new()),
            pending: PendingResponses::new(),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            last_poll: Mutex::new(Instant::now()),
            liveness: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
        });

        *lock(&session.liveness) = liveness::spawn(&session);
        core.registry.insert(session.clone());
        metrics::session_created();
        tracing::debug!(session_id = %session.id, "Session created");
        core.events.emit(ServerEvent::SessionCreate {
            session: session.clone(),
        });
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Identity declared by the client during the handshake.
    pub fn client_id(&self) -> Option<String> {
        lock(&self.client_id).clone()
    }

    /// Whether the version handshake completed.
    pub fn is_connected(&self) -> bool {
        lock(&self.client_id).is_some() && !self.is_destroyed()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::SeqCst)
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of requests waiting for the next poll.
    pub fn queued_count(&self) -> usize {
        lock(&self.queue).len()
    }

    pub(crate) fn core(&self) -> Option<Arc<ServerCore>> {
        self.core.upgrade()
    }

    /// Queue a request without waiting for its response.
    pub fn enqueue(&self, channel: impl IntoChannelId, data: Value) -> Result<RequestId, ChannelIdError> {
        let channel_id = channel.into_channel_id()?;
        let request_id = RequestId::new();
        self.push(ServerRequest::new(channel_id, request_id, data));
        Ok(request_id)
    }

    /// Send a request to the client and wait for its response.
    ///
    /// Never fails once the channel id is valid: deadlines and teardown
    /// come back as `Timeout` and `Abort` responses.
    pub async fn send(
        &self,
        channel: impl IntoChannelId,
        data: Value,
        timeout: Duration,
    ) -> Result<ClientResponse, ChannelIdError> {
        let channel_id = channel.into_channel_id()?;
        Ok(self.request(channel_id, data, timeout).await)
    }

    pub(crate) async fn request(&self, channel_id: ChannelId, data: Value, timeout: Duration) -> ClientResponse {
        let request_id = RequestId::new();
        if self.is_destroyed() {
            return self.aborted(request_id);
        }

        let mut rx = self.pending.register(request_id);
        // `destroy` sets the flag before aborting, so either it sees this
        // entry or this check sees the flag.
        if self.is_destroyed() {
            self.pending.discard(&request_id);
            return self.aborted(request_id);
        }
        self.push(ServerRequest::new(channel_id, request_id, data));

        let response = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => self.aborted(request_id),
            Err(_) => {
                if self.pending.discard(&request_id) {
                    tracing::debug!(session_id = %self.id, request_id = %request_id, "Request timed out");
                    ClientResponse::new(
                        self.id,
                        request_id,
                        Outcome::failure(ErrorReason::Timeout, "Request timed out"),
                    )
                } else {
                    // Settled concurrently with the deadline; the value is in flight.
                    (&mut rx).await.unwrap_or_else(|_| self.aborted(request_id))
                }
            }
        };

        metrics::server_request_settled(&response.outcome);
        response
    }

    fn aborted(&self, request_id: RequestId) -> ClientResponse {
        ClientResponse::new(
            self.id,
            request_id,
            Outcome::failure(ErrorReason::Abort, "Session disconnected"),
        )
    }

    fn push(&self, request: ServerRequest) {
        lock(&self.queue).push(request);
    }

    /// Take every queued request, in enqueue order, and mark the poll.
    pub fn drain_queue(&self) -> Vec<ServerRequest> {
        *lock(&self.last_poll) = Instant::now();
        std::mem::take(&mut *lock(&self.queue))
    }

    /// Time since the last poll, the handshake, or creation, whichever is latest.
    pub fn since_last_poll(&self) -> Duration {
        lock(&self.last_poll).elapsed()
    }

    /// Route a client response to its pending request.
    ///
    /// An unknown request id is reported as an error event and otherwise ignored.
    pub fn resolve(&self, response: ClientResponse) -> bool {
        let request_id = response.request_id;
        match self.pending.resolve(response) {
            Some(elapsed) => {
                let mut latencies = lock(&self.latencies);
                if latencies.len() >= LATENCY_WINDOW {
                    latencies.pop_front();
                }
                latencies.push_back(elapsed);
                true
            }
            None => {
                tracing::warn!(
                    session_id = %self.id,
                    request_id = %request_id,
                    "Received response for unknown request"
                );
                if let Some(core) = self.core() {
                    core.events.emit(ServerEvent::Error {
                        error: BridgeError::UnknownRequest {
                            session_id: self.id,
                            request_id,
                        },
                    });
                }
                false
            }
        }
    }

    /// Mean of the last few request round-trips.
    pub fn average_ping(&self) -> Option<Duration> {
        let latencies = lock(&self.latencies);
        if latencies.is_empty() {
            return None;
        }
        let total: Duration = latencies.iter().sum();
        Some(total / latencies.len() as u32)
    }

    /// Measure latency to the client with an internal ping.
    pub async fn ping(&self) -> Result<PingResult, PingError> {
        let timeout = self
            .core()
            .map(|core| core.settings.load().ping_timeout())
            .unwrap_or(Duration::from_secs(20));
        let start = Instant::now();
        let sent_at = epoch_millis();
        let data = serde_json::to_value(PingRequest { sent_at })?;

        let response = self
            .request(ChannelId::internal(internal::PING), data, timeout)
            .await;

        match response.outcome {
            Outcome::Success(data) => {
                let reply: PingReply = serde_json::from_value(data)?;
                Ok(PingResult {
                    round_trip: start.elapsed(),
                    to_client: Duration::from_millis(reply.received_at.saturating_sub(sent_at)),
                })
            }
            Outcome::Failure { message, reason } => Err(PingError::Failed { reason, message }),
        }
    }

    /// Record a completed handshake. The silence clock restarts here.
    pub(crate) fn mark_connected(&self, client_id: String) {
        *lock(&self.client_id) = Some(client_id);
        *lock(&self.last_poll) = Instant::now();
    }

    /// Claim the right to run a disconnect. False if one is already underway.
    pub(crate) fn begin_disconnect(&self) -> bool {
        !self.disconnecting.swap(true, Ordering::SeqCst)
    }

    /// Notify the client, then destroy the session.
    ///
    /// The notice is bounded by the configured wait; an undelivered notice
    /// is logged and does not prevent teardown.
    pub async fn disconnect(self: &Arc<Self>, reason: DisconnectReason) {
        if self.is_destroyed() || !self.begin_disconnect() {
            return;
        }

        let wait = self
            .core()
            .map(|core| core.settings.load().disconnect_wait())
            .unwrap_or(Duration::from_secs(5));

        tracing::info!(session_id = %self.id, reason = %reason, "Disconnecting session");
        match serde_json::to_value(DisconnectNotice::new(reason)) {
            Ok(notice) => {
                let response = self
                    .request(ChannelId::internal(internal::DISCONNECT), notice, wait)
                    .await;
                if let Outcome::Failure { message, .. } = response.outcome {
                    tracing::warn!(session_id = %self.id, error = %message, "Disconnect notice not delivered");
                    if let Some(core) = self.core() {
                        core.events.emit(ServerEvent::Error {
                            error: BridgeError::DisconnectNotice {
                                session_id: self.id,
                                message,
                            },
                        });
                    }
                }
            }
            Err(e) => tracing::error!(session_id = %self.id, error = %e, "Failed to encode disconnect notice"),
        }

        if let Some(core) = self.core() {
            core.events.emit(ServerEvent::ClientDisconnect {
                session: self.clone(),
                reason,
            });
        }
        self.destroy();
    }

    /// Abort pending requests, stop the liveness check and unregister.
    /// Safe to call more than once.
    pub fn destroy(self: &Arc<Self>) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let aborted = self.pending.abort_all(self.id);
        if let Some(handle) = lock(&self.liveness).take() {
            handle.abort();
        }
        lock(&self.queue).clear();

        tracing::debug!(session_id = %self.id, aborted, "Session destroyed");
        metrics::session_destroyed();
        if let Some(core) = self.core() {
            core.registry.remove(&self.id);
            core.events.emit(ServerEvent::SessionDestroy {
                session: self.clone(),
            });
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("client_id", &self.client_id())
            .field("queued", &self.queued_count())
            .field("pending", &self.pending.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::events::Event;
    use crate::server::events::ServerEventKind;
    use serde_json::json;

    fn core() -> Arc<ServerCore> {
        ServerCore::new(SessionConfig::default())
    }

    #[tokio::test]
    async fn test_create_registers_and_emits() {
        let core = core();
        let created = Arc::new(Mutex::new(0));
        let c = created.clone();
        core.events.on(ServerEventKind::SessionCreate, move |_| *c.lock().unwrap() += 1);

        let session = Session::create(&core);
        assert!(core.registry.get(&session.id()).is_some());
        assert_eq!(*created.lock().unwrap(), 1);
        assert!(!session.is_connected());
    }

    #[test]
    fn test_enqueue_validates_namespace() {
        let core = core();
        let session = Session::create(&core);
        assert!(matches!(
            session.enqueue("nonamespace", json!(null)),
            Err(ChannelIdError::NamespaceRequired(_))
        ));
        assert_eq!(session.queued_count(), 0);
    }

    #[test]
    fn test_drain_is_exhaustive_and_ordered() {
        let core = core();
        let session = Session::create(&core);
        let first = session.enqueue("app:a", json!(1)).unwrap();
        let second = session.enqueue("app:b", json!(2)).unwrap();

        let batch = session.drain_queue();
        let ids: Vec<_> = batch.iter().map(|r| r.request_id).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(session.drain_queue().is_empty());
        assert!(session.since_last_poll() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_send_resolves_with_response() {
        let core = core();
        let session = Session::create(&core);

        let s = session.clone();
        let responder = tokio::spawn(async move {
            loop {
                let batch = s.drain_queue();
                if let Some(request) = batch.into_iter().next() {
                    let response = ClientResponse::new(s.id(), request.request_id, Outcome::success(json!("pong")));
                    assert!(s.resolve(response));
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let response = session
            .send("app:ping", json!({}), Duration::from_secs(2))
            .await
            .unwrap();
        responder.await.unwrap();

        assert_eq!(response.outcome, Outcome::success(json!("pong")));
        assert_eq!(session.pending_count(), 0);
        assert!(session.average_ping().is_some());
    }

    #[tokio::test]
    async fn test_send_timeout_discards_entry() {
        let core = core();
        let session = Session::create(&core);
        let errors = Arc::new(Mutex::new(0));
        let e = errors.clone();
        core.events.on(ServerEventKind::Error, move |_| *e.lock().unwrap() += 1);

        let response = session
            .send("app:slow", json!(null), Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(response.outcome.error_reason(), Some(ErrorReason::Timeout));
        assert_eq!(session.pending_count(), 0);

        // a late reply is reported, not delivered
        let late = ClientResponse::new(session.id(), response.request_id, Outcome::success(json!(1)));
        assert!(!session.resolve(late));
        assert_eq!(*errors.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_destroy_aborts_pending() {
        let core = core();
        let session = Session::create(&core);

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let s = session.clone();
            waiters.push(tokio::spawn(async move {
                s.send("app:wait", json!(null), Duration::from_secs(5)).await.unwrap()
            }));
        }
        while session.pending_count() < 3 {
            tokio::task::yield_now().await;
        }

        session.destroy();
        session.destroy();

        for waiter in waiters {
            let response = waiter.await.unwrap();
            assert_eq!(response.outcome.error_reason(), Some(ErrorReason::Abort));
        }
        assert_eq!(session.pending_count(), 0);
        assert!(core.registry.get(&session.id()).is_none());

        let after = session.send("app:wait", json!(null), Duration::from_secs(5)).await.unwrap();
        assert_eq!(after.outcome.error_reason(), Some(ErrorReason::Abort));
    }

    #[tokio::test]
    async fn test_destroy_emits_once() {
        let core = core();
        let session = Session::create(&core);
        let mut rx = core.events.subscribe();

        session.destroy();
        session.destroy();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), ServerEventKind::SessionDestroy);
        assert!(rx.try_recv().is_err());
    }

    fn quick_liveness() -> SessionConfig {
        SessionConfig {
            request_interval_ticks: 2,
            tick_ms: 5,
            timeout_multiplier: 4.0,
            liveness_check_ms: 10,
            disconnect_wait_ms: 30,
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_session_without_handshake_is_reaped() {
        let core = ServerCore::new(quick_liveness());
        let disconnects = Arc::new(Mutex::new(0));
        let d = disconnects.clone();
        core.events.on(ServerEventKind::ClientDisconnect, move |_| *d.lock().unwrap() += 1);

        let session = Session::create(&core);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(session.is_destroyed());
        assert!(core.registry.is_empty());
        // Nobody to notify, so no disconnect is reported.
        assert_eq!(*disconnects.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_polling_keeps_unconnected_session_alive() {
        let core = ServerCore::new(SessionConfig {
            timeout_multiplier: 10.0,
            ..quick_liveness()
        });
        let session = Session::create(&core);

        for _ in 0..20 {
            session.drain_queue();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!session.is_destroyed());
        session.destroy();
    }

    #[tokio::test]
    async fn test_disconnect_without_client_times_out_then_destroys() {
        let mut settings = SessionConfig::default();
        settings.disconnect_wait_ms = 30;
        let core = ServerCore::new(settings);
        let session = Session::create(&core);

        let reasons = Arc::new(Mutex::new(Vec::new()));
        let r = reasons.clone();
        core.events.on(ServerEventKind::ClientDisconnect, move |event| {
            if let ServerEvent::ClientDisconnect { reason, .. } = event {
                r.lock().unwrap().push(*reason);
            }
        });

        session.disconnect(DisconnectReason::Disconnect).await;
        assert!(session.is_destroyed());
        assert_eq!(*reasons.lock().unwrap(), vec![DisconnectReason::Disconnect]);
        assert!(core.registry.is_empty());
    }
}
