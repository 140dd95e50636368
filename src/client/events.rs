//! Events published by a [`BridgeClient`](crate::client::BridgeClient).

use crate::events::Event;
use crate::protocol::{DisconnectReason, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Handshake completed.
    Connect { session_id: SessionId },
    Disconnect { reason: DisconnectReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEventKind {
    Connect,
    Disconnect,
}

impl Event for ClientEvent {
    type Kind = ClientEventKind;

    fn kind(&self) -> ClientEventKind {
        match self {
            ClientEvent::Connect { .. } => ClientEventKind::Connect,
            ClientEvent::Disconnect { .. } => ClientEventKind::Disconnect,
        }
    }
}
