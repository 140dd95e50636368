//! Correlation of server-initiated requests with their responses.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::protocol::{ClientResponse, ErrorReason, Outcome, RequestId, SessionId};

struct PendingEntry {
    tx: oneshot::Sender<ClientResponse>,
    sent_at: Instant,
}

/// In-flight requests of one session.
///
/// Every settlement path removes the entry first, so each request id is
/// completed at most once no matter which path gets there first.
#[derive(Default)]
pub(crate) struct PendingResponses {
    entries: DashMap<RequestId, PendingEntry>,
}

impl PendingResponses {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, request_id: RequestId) -> oneshot::Receiver<ClientResponse> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            request_id,
            PendingEntry {
                tx,
                sent_at: Instant::now(),
            },
        );
        rx
    }

    /// Complete a pending request. Returns the round-trip time, or `None`
    /// when the id is unknown (never sent, already settled, or timed out).
    pub(crate) fn resolve(&self, response: ClientResponse) -> Option<Duration> {
        let (_, entry) = self.entries.remove(&response.request_id)?;
        let elapsed = entry.sent_at.elapsed();
        // The waiter may have given up already; the entry is gone either way.
        let _ = entry.tx.send(response);
        Some(elapsed)
    }

    /// Drop an entry without completing it. Returns false if it was already settled.
    pub(crate) fn discard(&self, request_id: &RequestId) -> bool {
        self.entries.remove(request_id).is_some()
    }

    /// Settle every entry with `Abort`. Returns how many were aborted.
    pub(crate) fn abort_all(&self, session_id: SessionId) -> usize {
        let ids: Vec<RequestId> = self.entries.iter().map(|e| *e.key()).collect();
        let mut aborted = 0;
        for request_id in ids {
            if let Some((_, entry)) = self.entries.remove(&request_id) {
                let _ = entry.tx.send(ClientResponse::new(
                    session_id,
                    request_id,
                    Outcome::failure(ErrorReason::Abort, "Session disconnected"),
                ));
                aborted += 1;
            }
        }
        aborted
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
