//! Protocol-level error types.

use thiserror::Error;

/// A channel id failed validation. Raised before any network I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelIdError {
    /// The id has no `namespace:` prefix.
    #[error("channel id \"{0}\" must include a namespace")]
    NamespaceRequired(String),

    /// The id uses the namespace reserved for protocol-internal actions.
    #[error("channel id \"{0}\" uses the reserved internal namespace")]
    ReservedNamespace(String),
}

/// A message envelope could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body is not valid JSON or does not match the envelope shape.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// The `type` discriminant is missing or unknown.
    #[error("unknown payload type: {0}")]
    UnknownType(String),

    /// `error: true` was set without `message` and `errorReason`.
    #[error("failure response is missing {0}")]
    IncompleteFailure(&'static str),
}
