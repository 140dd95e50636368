//! HTTP surface of the server.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, request id, timeout, trace layers)
//!     → handlers.rs
//!         GET  /new    allocate a session
//!         GET  /query  drain the session queue
//!         POST /query  client request or response
//! ```
//!
//! # Design Decisions
//! - Every protocol outcome is a 200 with a structured body
//! - The session id is read from the `session-id` header, then the `sessionId` query parameter

pub(crate) mod handlers;
pub mod server;

pub(crate) use server::build_router;
pub use server::X_REQUEST_ID;
