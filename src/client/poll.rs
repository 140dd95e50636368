//! The poll cycle: `GET /query` every `requestIntervalTicks`, dispatch the
//! batch, post each answer back.

use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::Value;

use crate::client::scheduler::{ScheduledTask, Ticks};
use crate::client::state::PollFailure;
use crate::client::{ClientEvent, ClientInner, ConnectionState, RequestContext};
use crate::observability::metrics;
use crate::protocol::{
    ClientResponse, DecodeError, DisconnectReason, ErrorReason, ServerRequest, ServerResponse,
    SessionId, SESSION_ID_HEADER,
};
use crate::transport::RequestOptions;

/// Body of a `GET /query` reply.
#[derive(Debug)]
pub(crate) enum PollReply {
    Batch(Vec<ServerRequest>),
    /// The server answered with a response envelope instead of a batch.
    Rejected(ServerResponse),
}

impl PollReply {
    pub(crate) fn parse(body: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(body)?;
        if value.is_array() {
            Ok(PollReply::Batch(serde_json::from_value(value)?))
        } else {
            Ok(PollReply::Rejected(ServerResponse::decode(body)?))
        }
    }
}

impl ClientInner {
    pub(super) fn start_polling(self: &Arc<Self>, every: u32) -> ScheduledTask {
        let client = Arc::downgrade(self);
        self.scheduler.schedule_repeating(
            Ticks(u64::from(every)),
            Box::new(move || {
                let client = client.clone();
                async move {
                    if let Some(client) = client.upgrade() {
                        client.poll_once().await;
                    }
                }
                .boxed()
            }),
        )
    }

    pub(super) async fn poll_once(self: &Arc<Self>) {
        let session_id = {
            let state = self.state();
            match state.session_id {
                Some(id) if state.phase == ConnectionState::Connected => id,
                _ => return,
            }
        };

        let options = RequestOptions::new()
            .header(SESSION_ID_HEADER, session_id.to_string())
            .timeout(self.config.query_timeout());
        let started = Instant::now();
        let body = match self.transport.get("/query", options).await {
            Ok(body) => body,
            Err(error) => {
                self.poll_failed(session_id, error.to_string());
                return;
            }
        };

        match PollReply::parse(&body) {
            Ok(PollReply::Batch(requests)) => {
                if !self.state().poll_succeeded(session_id) {
                    return;
                }
                self.record_latency(started.elapsed());
                if !requests.is_empty() {
                    tracing::trace!(session_id = %session_id, count = requests.len(), "Dispatching poll batch");
                }
                for request in requests {
                    self.dispatch_request(session_id, request);
                }
            }
            Ok(PollReply::Rejected(response))
                if response.outcome.error_reason() == Some(ErrorReason::InvalidSession) =>
            {
                tracing::warn!(session_id = %session_id, "Server no longer knows this session");
                self.connection_lost(session_id);
            }
            Ok(PollReply::Rejected(response)) => {
                self.poll_failed(session_id, format!("unexpected poll reply: {:?}", response.outcome));
            }
            Err(error) => self.poll_failed(session_id, error.to_string()),
        }
    }

    fn poll_failed(self: &Arc<Self>, session_id: SessionId, error: String) {
        let failure = self
            .state()
            .poll_failed(session_id, self.config.failure_threshold);

        match failure {
            PollFailure::Stale => {}
            PollFailure::Counted(failures) => {
                metrics::poll_failed();
                self.transport.cancel_all("Poll failed");
                tracing::warn!(session_id = %session_id, failures, error = %error, "Poll failed");
            }
            PollFailure::Escalate => {
                metrics::poll_failed();
                tracing::warn!(
                    session_id = %session_id,
                    failures = self.config.failure_threshold,
                    error = %error,
                    "Poll failed too many times"
                );
                self.connection_lost(session_id);
            }
        }
    }

    /// Drop the session and start reconnecting in the background.
    ///
    /// May run inside the poll task it cancels, so nothing here awaits.
    pub(super) fn connection_lost(self: &Arc<Self>, session_id: SessionId) {
        {
            let mut state = self.state();
            if state.session_id != Some(session_id) {
                return;
            }
            state.teardown();
        }
        self.clear_latencies();
        self.transport.cancel_all("Connection lost");
        metrics::reconnect_started();
        tracing::warn!(session_id = %session_id, "Connection lost; reconnecting");
        self.events.emit(ClientEvent::Disconnect {
            reason: DisconnectReason::ConnectionLost,
        });

        let client = self.clone();
        tokio::spawn(async move {
            if let Err(error) = client.connect().await {
                tracing::error!(error = %error, "Reconnect failed");
            }
        });
    }

    fn dispatch_request(self: &Arc<Self>, session_id: SessionId, request: ServerRequest) {
        let client = self.clone();
        tokio::spawn(async move {
            let context = RequestContext {
                session_id,
                client: Arc::downgrade(&client),
            };
            let outcome = client
                .dispatcher
                .handle(&request.channel_id, request.data, context)
                .await;

            let response = ClientResponse::new(session_id, request.request_id, outcome);
            let body = match serde_json::to_string(&response) {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(error = %e, request_id = %request.request_id, "Failed to encode response");
                    return;
                }
            };

            let options = RequestOptions::new().timeout(client.config.request_timeout());
            if let Err(e) = client.transport.post("/query", body, options).await {
                tracing::warn!(
                    channel_id = %request.channel_id,
                    request_id = %request.request_id,
                    error = %e,
                    "Failed to deliver response"
                );
            }
        });
    }
}
