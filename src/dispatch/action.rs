//! What a handler receives.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::protocol::{ChannelId, ErrorReason, Outcome};

/// Single-use reply slot for one request.
///
/// Cloneable so it can be moved into a spawned task; whichever clone
/// responds first wins.
#[derive(Clone)]
pub struct Responder {
    slot: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

impl Responder {
    pub(crate) fn new(tx: oneshot::Sender<Outcome>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Reply with a success payload. Returns false if a reply was already sent.
    pub fn respond<T: Serialize>(&self, data: T) -> bool {
        let outcome = match serde_json::to_value(data) {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::failure(
                ErrorReason::InternalError,
                format!("An error occurred while handling the request\n{e}"),
            ),
        };
        self.send(outcome)
    }

    /// Reply with an explicit failure.
    pub fn fail(&self, reason: ErrorReason, message: impl Into<String>) -> bool {
        self.send(Outcome::failure(reason, message))
    }

    pub fn is_responded(&self) -> bool {
        self.lock().is_none()
    }

    pub(crate) fn send(&self, outcome: Outcome) -> bool {
        match self.lock().take() {
            // The receiver only disappears if the caller stopped waiting.
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<Outcome>>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("responded", &self.is_responded())
            .finish()
    }
}

/// An inbound request as seen by a handler.
///
/// `C` is the side-specific context: the server passes the originating
/// session, the client passes its current session id.
pub struct Action<C> {
    channel_id: ChannelId,
    data: Value,
    context: C,
    responder: Responder,
}

impl<C> Action<C> {
    pub(crate) fn new(channel_id: ChannelId, data: Value, context: C, responder: Responder) -> Self {
        Self {
            channel_id,
            data,
            context,
            responder,
        }
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Raw request payload.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Deserialize the payload into a typed value.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn respond<T: Serialize>(&self, data: T) -> bool {
        self.responder.respond(data)
    }

    pub fn fail(&self, reason: ErrorReason, message: impl Into<String>) -> bool {
        self.responder.fail(reason, message)
    }

    /// A detached handle for responding after the handler returns.
    pub fn responder(&self) -> Responder {
        self.responder.clone()
    }
}

impl<C: fmt::Debug> fmt::Debug for Action<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("channel_id", &self.channel_id)
            .field("data", &self.data)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
