//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! client poll fails N times, or session rejected:
//!     → connection state machine escalates to reconnect
//!     → backoff.rs picks the delay between attempts
//!     → attempts stop at the configured ceiling
//! ```
//!
//! # Design Decisions
//! - Delays are exponential and capped; jitter is opt-in
//! - Every outbound call has a deadline (see the transport)

pub mod backoff;

pub use backoff::{reconnect_delay, reconnect_delay_with_jitter};
