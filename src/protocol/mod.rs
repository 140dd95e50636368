//! Wire protocol shared by the server and the client.
//!
//! # Data Flow
//! ```text
//! server → client (delivered on poll):
//!     ServerRequest { type: "Request", channelId, requestId, data }
//!     ← ClientResponse { type: "Response", sessionId, requestId, error, ... }
//!
//! client → server (synchronous POST):
//!     ClientRequest { type: "Request", channelId, sessionId, data }
//!     → ServerResponse { type: "Response", error, data | message + errorReason }
//! ```
//!
//! # Design Decisions
//! - Every channel id carries a namespace (`ns:action`); [`ChannelId`]
//!   cannot be constructed without one
//! - `error: true` is the only failure signal when decoding a response
//! - Protocol-internal actions live in a reserved namespace

pub mod actions;
pub mod channel;
pub mod error;
pub mod message;

pub use actions::{
    ConnectRequest, DisconnectNotice, DisconnectReason, PingReply, PingRequest, SessionCreated,
};
pub use channel::{ChannelId, IntoChannelId, INTERNAL_NAMESPACE, NAMESPACE_SEPARATOR};
pub use error::{ChannelIdError, DecodeError};
pub use message::{
    ClientMessage, ClientRequest, ClientResponse, ErrorReason, Outcome, PayloadType, RequestId,
    ServerRequest, ServerResponse, SessionId,
};

/// Protocol version exchanged during the connect handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Header carrying the session id on `GET /query`.
pub const SESSION_ID_HEADER: &str = "session-id";

/// Query parameter accepted when the session header is absent.
pub const SESSION_ID_PARAM: &str = "sessionId";
