//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig
//!
//! On change:
//!     watcher.rs sees the file (or a rename over it) in its directory
//!     → loader.rs loads and validates
//!     → ConfigDiff against the last revision read
//!     → [listener]/[observability] edits: warn, restart required
//!     → [session] edits: published on a watch channel
//!     → BridgeServer::apply_config swaps the live SessionConfig
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - A reload that fails validation is logged and dropped
//! - Reloaded session timing applies to new sessions and the next liveness check

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{BridgeConfig, ClientConfig, ListenerConfig, ObservabilityConfig, SessionConfig};
pub use validation::{validate_config, ValidationError};
pub use watcher::{ConfigDiff, ConfigWatcher, Reload};
