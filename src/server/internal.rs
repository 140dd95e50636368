//! Server handlers for the reserved `script-bridge:*` channels.

use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::{Action, Dispatcher, HandlerError};
use crate::protocol::actions::epoch_millis;
use crate::protocol::channel::internal;
use crate::protocol::{ConnectRequest, DisconnectNotice, DisconnectReason, PingReply, PROTOCOL_VERSION};
use crate::server::events::ServerEvent;
use crate::server::session::Session;

pub(crate) fn register(dispatcher: &Dispatcher<Arc<Session>>) {
    dispatcher.register_internal(internal::CONNECT, connect);
    dispatcher.register_internal(internal::DISCONNECT, disconnect);
    dispatcher.register_internal(internal::PING, ping);
}

/// Version handshake. The reply always succeeds; a mismatch is answered
/// with a disconnect notice on the next poll.
async fn connect(action: Action<Arc<Session>>) -> Result<(), HandlerError> {
    let request: ConnectRequest = action.parse()?;
    let session = action.context().clone();
    action.respond(Value::Null);

    let mismatch = match PROTOCOL_VERSION.cmp(&request.protocol_version) {
        Ordering::Greater => Some(DisconnectReason::OutdatedClient),
        Ordering::Less => Some(DisconnectReason::OutdatedServer),
        Ordering::Equal => None,
    };

    if let Some(reason) = mismatch {
        tracing::warn!(
            session_id = %session.id(),
            client_id = %request.client_id,
            client_version = request.protocol_version,
            server_version = PROTOCOL_VERSION,
            "Protocol version mismatch"
        );
        // The client only starts polling after this reply, so the notice
        // cannot be awaited here.
        tokio::spawn(async move { session.disconnect(reason).await });
        return Ok(());
    }

    tracing::info!(session_id = %session.id(), client_id = %request.client_id, "Client connected");
    session.mark_connected(request.client_id);
    if let Some(core) = session.core() {
        core.events.emit(ServerEvent::ClientConnect { session });
    }
    Ok(())
}

/// Client-initiated disconnect.
async fn disconnect(action: Action<Arc<Session>>) -> Result<(), HandlerError> {
    let notice = action
        .parse::<DisconnectNotice>()
        .unwrap_or_else(|_| DisconnectNotice::new(DisconnectReason::Disconnect));
    let session = action.context().clone();
    session.begin_disconnect();

    tracing::info!(session_id = %session.id(), reason = %notice.reason, "Client disconnected");
    if let Some(core) = session.core() {
        core.events.emit(ServerEvent::ClientDisconnect {
            session: session.clone(),
            reason: notice.reason,
        });
    }
    action.respond(Value::Null);
    session.destroy();
    Ok(())
}

async fn ping(action: Action<Arc<Session>>) -> Result<(), HandlerError> {
    action.respond(PingReply {
        received_at: epoch_millis(),
    });
    Ok(())
}
