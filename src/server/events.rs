//! Events published by a [`BridgeServer`](crate::server::BridgeServer).

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::events::Event;
use crate::protocol::{
    ChannelId, ClientRequest, ClientResponse, DisconnectReason, RequestId, ServerRequest,
    ServerResponse, SessionId,
};
use crate::server::session::Session;

/// Non-fatal problems surfaced through [`ServerEvent::Error`].
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("no handler found for channel: {channel_id}")]
    UnhandledRequest { channel_id: ChannelId },

    #[error("handler for {channel_id} failed: {message}")]
    HandlerFailed { channel_id: ChannelId, message: String },

    #[error("received response for unknown request: {request_id} (session {session_id})")]
    UnknownRequest {
        session_id: SessionId,
        request_id: RequestId,
    },

    #[error("disconnect notice to session {session_id} not delivered: {message}")]
    DisconnectNotice { session_id: SessionId, message: String },
}

impl From<DispatchError> for BridgeError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Unhandled { channel_id } => BridgeError::UnhandledRequest { channel_id },
            DispatchError::HandlerFailed { channel_id, message } => {
                BridgeError::HandlerFailed { channel_id, message }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ServerOpen { address: SocketAddr },
    ServerClose,
    /// Handshake completed with a matching protocol version.
    ClientConnect { session: Arc<Session> },
    ClientDisconnect {
        session: Arc<Session>,
        reason: DisconnectReason,
    },
    SessionCreate { session: Arc<Session> },
    SessionDestroy { session: Arc<Session> },
    /// A poll was served.
    QueryReceive { session: Arc<Session> },
    /// A queued request was handed to the client in a poll batch.
    RequestSend {
        session: Arc<Session>,
        request: ServerRequest,
    },
    /// A reply to a client request was returned.
    ResponseSend {
        session: Arc<Session>,
        response: ServerResponse,
    },
    RequestReceive {
        session: Arc<Session>,
        request: ClientRequest,
    },
    ResponseReceive {
        session: Arc<Session>,
        response: ClientResponse,
    },
    Error { error: BridgeError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    ServerOpen,
    ServerClose,
    ClientConnect,
    ClientDisconnect,
    SessionCreate,
    SessionDestroy,
    QueryReceive,
    RequestSend,
    ResponseSend,
    RequestReceive,
    ResponseReceive,
    Error,
}

impl Event for ServerEvent {
    type Kind = ServerEventKind;

    fn kind(&self) -> ServerEventKind {
        match self {
            ServerEvent::ServerOpen { .. } => ServerEventKind::ServerOpen,
            ServerEvent::ServerClose => ServerEventKind::ServerClose,
            ServerEvent::ClientConnect { .. } => ServerEventKind::ClientConnect,
            ServerEvent::ClientDisconnect { .. } => ServerEventKind::ClientDisconnect,
            ServerEvent::SessionCreate { .. } => ServerEventKind::SessionCreate,
            ServerEvent::SessionDestroy { .. } => ServerEventKind::SessionDestroy,
            ServerEvent::QueryReceive { .. } => ServerEventKind::QueryReceive,
            ServerEvent::RequestSend { .. } => ServerEventKind::RequestSend,
            ServerEvent::ResponseSend { .. } => ServerEventKind::ResponseSend,
            ServerEvent::RequestReceive { .. } => ServerEventKind::RequestReceive,
            ServerEvent::ResponseReceive { .. } => ServerEventKind::ResponseReceive,
            ServerEvent::Error { .. } => ServerEventKind::Error,
        }
    }
}

impl ServerEvent {
    /// The session this event concerns, if any.
    pub fn session(&self) -> Option<&Arc<Session>> {
        match self {
            ServerEvent::ClientConnect { session }
            | ServerEvent::ClientDisconnect { session, .. }
            | ServerEvent::SessionCreate { session }
            | ServerEvent::SessionDestroy { session }
            | ServerEvent::QueryReceive { session }
            | ServerEvent::RequestSend { session, .. }
            | ServerEvent::ResponseSend { session, .. }
            | ServerEvent::RequestReceive { session, .. }
            | ServerEvent::ResponseReceive { session, .. } => Some(session),
            ServerEvent::ServerOpen { .. } | ServerEvent::ServerClose | ServerEvent::Error { .. } => {
                None
            }
        }
    }
}
