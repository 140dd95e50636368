//! Payloads of the protocol-internal actions.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::protocol::message::SessionId;

/// Response to `GET /new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: SessionId,
    /// How many scheduler ticks the client waits between polls.
    pub request_interval_ticks: u32,
}

/// Client → server version handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub client_id: String,
    pub protocol_version: u32,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Explicit, requested by either side.
    Disconnect,
    /// Polls stopped arriving, or too many polls failed.
    ConnectionLost,
    /// The server speaks a newer protocol.
    OutdatedClient,
    /// The client speaks a newer protocol.
    OutdatedServer,
}

impl DisconnectReason {
    /// Version mismatches are terminal; reconnecting cannot fix them.
    pub fn is_version_mismatch(&self) -> bool {
        matches!(
            self,
            DisconnectReason::OutdatedClient | DisconnectReason::OutdatedServer
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Disconnect => "Disconnect",
            DisconnectReason::ConnectionLost => "ConnectionLost",
            DisconnectReason::OutdatedClient => "OutdatedClient",
            DisconnectReason::OutdatedServer => "OutdatedServer",
        }
    }
}

impl Default for DisconnectReason {
    fn default() -> Self {
        DisconnectReason::Disconnect
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disconnect notice, sent in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectNotice {
    pub reason: DisconnectReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DisconnectNotice {
    pub fn new(reason: DisconnectReason) -> Self {
        Self {
            reason,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    /// Sender's clock, milliseconds since the Unix epoch.
    pub sent_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReply {
    /// Receiver's clock, milliseconds since the Unix epoch.
    pub received_at: u64,
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
