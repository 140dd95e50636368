//! Request dispatch, shared by both ends of the bridge.
//!
//! # Data Flow
//! ```text
//! inbound request (channel id, payload, context)
//!     → handler lookup (missing → UnhandledRequest)
//!     → handler(Action) with a single-use Responder
//!     → handler error or panic → InternalError (unless already responded)
//!     → Outcome
//! ```
//!
//! # Design Decisions
//! - Re-registering a channel replaces the handler with a warning
//! - The first `respond` wins; later calls are no-ops
//! - A failure after responding is only logged, the sent reply stands

pub mod action;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::protocol::{ChannelId, ChannelIdError, ErrorReason, IntoChannelId, Outcome};

pub use action::{Action, Responder};

/// Error returned by a handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Something that can serve requests for one channel.
pub trait Handler<C>: Send + Sync + 'static {
    fn call(&self, action: Action<C>) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<C, F, Fut> Handler<C> for F
where
    F: Fn(Action<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn call(&self, action: Action<C>) -> BoxFuture<'static, Result<(), HandlerError>> {
        self(action).boxed()
    }
}

/// Failure reported to the dispatcher's error hook.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("received request for unhandled channel: {channel_id}")]
    Unhandled { channel_id: ChannelId },

    #[error("handler for {channel_id} failed: {message}")]
    HandlerFailed { channel_id: ChannelId, message: String },
}

type ErrorHook = Arc<dyn Fn(DispatchError) + Send + Sync>;

/// Routes requests to registered handlers.
pub struct Dispatcher<C> {
    name: &'static str,
    handlers: DashMap<ChannelId, Arc<dyn Handler<C>>>,
    on_error: Option<ErrorHook>,
}

impl<C: Send + 'static> Dispatcher<C> {
    /// `name` labels log lines ("server", "client").
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: DashMap::new(),
            on_error: None,
        }
    }

    /// Install the observability hook for unhandled requests and handler failures.
    pub fn with_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(DispatchError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Register an application handler. The internal namespace is rejected.
    pub fn register<H>(&self, channel_id: impl IntoChannelId, handler: H) -> Result<(), ChannelIdError>
    where
        H: Handler<C>,
    {
        let channel_id = channel_id.into_channel_id()?;
        if channel_id.is_internal() {
            return Err(ChannelIdError::ReservedNamespace(channel_id.into()));
        }
        self.insert(channel_id, Arc::new(handler));
        Ok(())
    }

    /// Register a handler for a reserved channel.
    pub(crate) fn register_internal<H>(&self, channel_id: &'static str, handler: H)
    where
        H: Handler<C>,
    {
        self.insert(ChannelId::internal(channel_id), Arc::new(handler));
    }

    pub fn unregister(&self, channel_id: &str) -> bool {
        self.handlers.remove(channel_id).is_some()
    }

    pub fn has_handler(&self, channel_id: &str) -> bool {
        self.handlers.contains_key(channel_id)
    }

    fn insert(&self, channel_id: ChannelId, handler: Arc<dyn Handler<C>>) {
        if self.handlers.contains_key(&channel_id) {
            tracing::warn!(
                dispatcher = self.name,
                channel_id = %channel_id,
                "Overwriting existing handler for channel"
            );
        }
        self.handlers.insert(channel_id, handler);
    }

    /// Run the handler for `channel_id` and produce its outcome.
    pub async fn handle(&self, channel_id: &ChannelId, data: serde_json::Value, context: C) -> Outcome {
        // Clone out of the map so no shard lock is held across the await.
        let handler = self.handlers.get(channel_id).map(|h| h.value().clone());
        let Some(handler) = handler else {
            tracing::warn!(dispatcher = self.name, channel_id = %channel_id, "No handler found for channel");
            self.report(DispatchError::Unhandled {
                channel_id: channel_id.clone(),
            });
            return Outcome::failure(
                ErrorReason::UnhandledRequest,
                format!("No handler found for channel: {channel_id}"),
            );
        };

        let (tx, rx) = oneshot::channel();
        let responder = Responder::new(tx);
        let action = Action::new(channel_id.clone(), data, context, responder.clone());

        let result = AssertUnwindSafe(handler.call(action)).catch_unwind().await;
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };

        if let Some(message) = failure {
            let outcome = Outcome::failure(
                ErrorReason::InternalError,
                format!("An error occurred while handling the request\n{message}"),
            );
            if responder.send(outcome) {
                tracing::error!(
                    dispatcher = self.name,
                    channel_id = %channel_id,
                    error = %message,
                    "Error while handling request"
                );
                self.report(DispatchError::HandlerFailed {
                    channel_id: channel_id.clone(),
                    message,
                });
            } else {
                tracing::warn!(
                    dispatcher = self.name,
                    channel_id = %channel_id,
                    error = %message,
                    "Handler failed after responding; reply already sent"
                );
            }
        }
        drop(responder);

        rx.await.unwrap_or_else(|_| {
            Outcome::failure(
                ErrorReason::InternalError,
                "handler finished without responding",
            )
        })
    }

    fn report(&self, error: DispatchError) {
        if let Some(hook) = &self.on_error {
            hook(error);
        }
    }
}

impl<C> fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
