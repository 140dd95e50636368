//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! server, session, dispatcher, client:
//!     → logging.rs (tracing events, EnvFilter)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Recording a metric without an installed recorder is a no-op
//! - `RUST_LOG` overrides the configured filter

pub mod logging;
pub mod metrics;
