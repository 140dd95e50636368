//! Request and response envelopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::protocol::channel::ChannelId;
use crate::protocol::error::DecodeError;

/// Discriminant carried in the `type` field of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadType {
    Request,
    Response,
}

/// Why a response carries `error: true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorReason {
    /// No handler registered for the channel.
    UnhandledRequest,
    /// The handler failed or panicked.
    InternalError,
    /// No response within the caller's deadline.
    Timeout,
    /// Unknown or expired session id.
    InvalidSession,
    /// The session was destroyed while the request was outstanding.
    Abort,
    /// Malformed envelope.
    InvalidPayload,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::UnhandledRequest => "UnhandledRequest",
            ErrorReason::InternalError => "InternalError",
            ErrorReason::Timeout => "Timeout",
            ErrorReason::InvalidSession => "InvalidSession",
            ErrorReason::Abort => "Abort",
            ErrorReason::InvalidPayload => "InvalidPayload",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Opaque server-assigned session identity.
    SessionId
);

uuid_id!(
    /// Correlation id of a server-initiated request.
    RequestId
);

/// Result half of a response envelope.
///
/// On the wire this is `{error: false, data}` or
/// `{error: true, message, errorReason}`; the two shapes are exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOutcome", into = "RawOutcome")]
pub enum Outcome {
    Success(Value),
    Failure { message: String, reason: ErrorReason },
}

impl Outcome {
    pub fn success(data: Value) -> Self {
        Outcome::Success(data)
    }

    pub fn failure(reason: ErrorReason, message: impl Into<String>) -> Self {
        Outcome::Failure {
            message: message.into(),
            reason,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Failure { .. })
    }

    /// The failure reason, if any.
    pub fn error_reason(&self) -> Option<ErrorReason> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure { reason, .. } => Some(*reason),
        }
    }

    /// The success payload, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Outcome::Success(data) => Some(data),
            Outcome::Failure { .. } => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutcome {
    #[serde(default)]
    error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<ErrorReason>,
}

impl TryFrom<RawOutcome> for Outcome {
    type Error = DecodeError;

    fn try_from(raw: RawOutcome) -> Result<Self, Self::Error> {
        if !raw.error {
            return Ok(Outcome::Success(raw.data.unwrap_or(Value::Null)));
        }
        let message = raw.message.ok_or(DecodeError::IncompleteFailure("message"))?;
        let reason = raw
            .error_reason
            .ok_or(DecodeError::IncompleteFailure("errorReason"))?;
        Ok(Outcome::Failure { message, reason })
    }
}

impl From<Outcome> for RawOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success(data) => RawOutcome {
                error: false,
                data: Some(data),
                message: None,
                error_reason: None,
            },
            Outcome::Failure { message, reason } => RawOutcome {
                error: true,
                data: None,
                message: Some(message),
                error_reason: Some(reason),
            },
        }
    }
}

/// Server → client request, delivered in a poll batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRequest {
    #[serde(rename = "type")]
    kind: PayloadType,
    pub channel_id: ChannelId,
    pub request_id: RequestId,
    #[serde(default)]
    pub data: Value,
}

impl ServerRequest {
    pub fn new(channel_id: ChannelId, request_id: RequestId, data: Value) -> Self {
        Self {
            kind: PayloadType::Request,
            channel_id,
            request_id,
            data,
        }
    }
}

/// Client → server request, answered synchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequest {
    #[serde(rename = "type")]
    kind: PayloadType,
    pub channel_id: ChannelId,
    pub session_id: SessionId,
    #[serde(default)]
    pub data: Value,
}

impl ClientRequest {
    pub fn new(channel_id: ChannelId, session_id: SessionId, data: Value) -> Self {
        Self {
            kind: PayloadType::Request,
            channel_id,
            session_id,
            data,
        }
    }
}

/// Server's answer to a [`ClientRequest`], also used for endpoint-level errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResponse {
    #[serde(rename = "type")]
    kind: PayloadType,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ServerResponse {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            kind: PayloadType::Response,
            outcome,
        }
    }

    pub fn success(data: Value) -> Self {
        Self::new(Outcome::Success(data))
    }

    pub fn failure(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self::new(Outcome::failure(reason, message))
    }

    /// Decode a response body.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let response: Self = serde_json::from_str(body)?;
        if response.kind != PayloadType::Response {
            return Err(DecodeError::UnknownType("Request".into()));
        }
        Ok(response)
    }
}

/// Client's answer to a [`ServerRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientResponse {
    #[serde(rename = "type")]
    kind: PayloadType,
    pub session_id: SessionId,
    pub request_id: RequestId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ClientResponse {
    pub fn new(session_id: SessionId, request_id: RequestId, outcome: Outcome) -> Self {
        Self {
            kind: PayloadType::Response,
            session_id,
            request_id,
            outcome,
        }
    }
}

/// Body of `POST /query`: either a new request or a reply to a polled one.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Request(ClientRequest),
    Response(ClientResponse),
}

impl ClientMessage {
    /// Decode by inspecting the `type` discriminant first.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(body)?;
        let kind = value
            .get("type")
            .cloned()
            .map(serde_json::from_value::<PayloadType>)
            .transpose()
            .map_err(|_| DecodeError::UnknownType(type_label(&value)))?;

        match kind {
            Some(PayloadType::Request) => Ok(ClientMessage::Request(serde_json::from_value(value)?)),
            Some(PayloadType::Response) => {
                Ok(ClientMessage::Response(serde_json::from_value(value)?))
            }
            None => Err(DecodeError::UnknownType("<missing>".into())),
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            ClientMessage::Request(r) => r.session_id,
            ClientMessage::Response(r) => r.session_id,
        }
    }
}

fn type_label(value: &Value) -> String {
    match value.get("type") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "<missing>".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_wire_shape() {
        let response = ServerResponse::success(json!({"ok": 1}));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"type": "Response", "error": false, "data": {"ok": 1}})
        );
    }

    #[test]
    fn test_failure_wire_shape() {
        let response = ServerResponse::failure(ErrorReason::InvalidSession, "Session is invalid");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "Response",
                "error": true,
                "message": "Session is invalid",
                "errorReason": "InvalidSession"
            })
        );
    }

    #[test]
    fn test_error_flag_is_sole_failure_signal() {
        // absent `error` is success
        let r = ServerResponse::decode(r#"{"type":"Response","data":5}"#).unwrap();
        assert_eq!(r.outcome, Outcome::Success(json!(5)));

        // falsy `error` is success even when a message is present
        let r = ServerResponse::decode(
            r#"{"type":"Response","error":false,"message":"ignored","data":null}"#,
        )
        .unwrap();
        assert!(!r.outcome.is_error());

        let r = ServerResponse::decode(
            r#"{"type":"Response","error":true,"message":"x","errorReason":"Timeout"}"#,
        )
        .unwrap();
        assert_eq!(r.outcome.error_reason(), Some(ErrorReason::Timeout));
    }

    #[test]
    fn test_incomplete_failure_rejected() {
        let err = ServerResponse::decode(r#"{"type":"Response","error":true}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_server_request_shape() {
        let id = RequestId::new();
        let request = ServerRequest::new(ChannelId::new("app:ping").unwrap(), id, json!({}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "Request");
        assert_eq!(value["channelId"], "app:ping");
        assert_eq!(value["requestId"], id.to_string());
    }

    #[test]
    fn test_client_message_dispatch_on_type() {
        let session = SessionId::new();
        let request = format!(
            r#"{{"type":"Request","channelId":"custom:test","sessionId":"{session}","data":{{"message":"hi"}}}}"#
        );
        match ClientMessage::decode(request.as_bytes()).unwrap() {
            ClientMessage::Request(r) => {
                assert_eq!(r.channel_id.as_str(), "custom:test");
                assert_eq!(r.session_id, session);
            }
            other => panic!("expected request, got {other:?}"),
        }

        let request_id = RequestId::new();
        let response = format!(
            r#"{{"type":"Response","sessionId":"{session}","requestId":"{request_id}","error":true,"message":"nope","errorReason":"UnhandledRequest"}}"#
        );
        match ClientMessage::decode(response.as_bytes()).unwrap() {
            ClientMessage::Response(r) => {
                assert_eq!(r.request_id, request_id);
                assert_eq!(r.outcome.error_reason(), Some(ErrorReason::UnhandledRequest));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_client_message_rejects_unknown_type() {
        assert!(matches!(
            ClientMessage::decode(br#"{"type":"Event"}"#),
            Err(DecodeError::UnknownType(t)) if t == "Event"
        ));
        assert!(ClientMessage::decode(b"not json").is_err());
        assert!(ClientMessage::decode(br#"{"channelId":"a:b"}"#).is_err());
    }
}
