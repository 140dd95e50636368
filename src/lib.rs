//! Script Bridge Library
//!
//! Request/response messaging between a server process and a client that
//! can only make outbound HTTP calls. The client long-polls the server for
//! queued requests and posts its answers back; it can also call server
//! handlers directly.

// Wire format
pub mod protocol;

// Both ends
pub mod dispatch;
pub mod events;

// Server side
pub mod http;
pub mod server;

// Client side
pub mod client;
pub mod transport;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use client::{BridgeClient, ClientError, ClientEvent, ConnectionState, RequestContext};
pub use config::BridgeConfig;
pub use dispatch::{Action, Dispatcher, Handler};
pub use lifecycle::Shutdown;
pub use protocol::{ChannelId, DisconnectReason, ErrorReason, Outcome, SessionId};
pub use server::{BridgeServer, ServerError, ServerEvent, Session};
