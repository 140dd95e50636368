//! Client handlers for the reserved `script-bridge:*` channels.

use serde_json::Value;

use crate::client::RequestContext;
use crate::dispatch::{Action, Dispatcher, HandlerError};
use crate::protocol::actions::epoch_millis;
use crate::protocol::channel::internal;
use crate::protocol::{DisconnectNotice, DisconnectReason, PingReply};

pub(crate) fn register(dispatcher: &Dispatcher<RequestContext>) {
    dispatcher.register_internal(internal::DISCONNECT, disconnect);
    dispatcher.register_internal(internal::PING, ping);
}

/// Server-initiated disconnect. Acknowledged, then the local session is
/// dropped without reconnecting.
async fn disconnect(action: Action<RequestContext>) -> Result<(), HandlerError> {
    let notice = action
        .parse::<DisconnectNotice>()
        .unwrap_or_else(|_| DisconnectNotice::new(DisconnectReason::Disconnect));
    action.respond(Value::Null);

    let context = action.context();
    if notice.reason.is_version_mismatch() {
        tracing::error!(
            session_id = %context.session_id(),
            reason = %notice.reason,
            "Protocol version mismatch; not reconnecting"
        );
    } else {
        tracing::info!(
            session_id = %context.session_id(),
            reason = %notice.reason,
            message = notice.message.as_deref().unwrap_or(""),
            "Server closed the session"
        );
    }

    if let Some(client) = context.inner() {
        client.server_disconnected(context.session_id(), notice.reason);
    }
    Ok(())
}

async fn ping(action: Action<RequestContext>) -> Result<(), HandlerError> {
    action.respond(PingReply {
        received_at: epoch_millis(),
    });
    Ok(())
}
