//! Process lifecycle shared by the daemon and the client CLI.
//!
//! # Data Flow
//! ```text
//! Ctrl-C / SIGTERM (signals.rs) → binary calls BridgeServer::stop or BridgeClient::disconnect
//!
//! BridgeServer::stop → sessions notified → Shutdown::trigger (shutdown.rs) → axum drains → serverClose
//! ```
//!
//! # Design Decisions
//! - The shutdown flag latches, so a late waiter still returns
//! - Sessions are told before the listener closes, never after

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
