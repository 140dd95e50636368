//! Configuration schema definitions.
//!
//! Every section carries defaults, so an empty file is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a bridge process.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// HTTP listener of the server side.
    pub listener: ListenerConfig,

    /// Session timing, applied by the server.
    pub session: SessionConfig,

    /// Connection settings of the client side.
    pub client: ClientConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Upper bound on handling one HTTP request.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Server-side session timing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Ticks the client waits between polls, handed out on `/new`.
    pub request_interval_ticks: u32,

    /// Length of one client tick.
    pub tick_ms: u64,

    /// A session is lost after `interval * multiplier` without a poll.
    /// `inf` disables the liveness check.
    pub timeout_multiplier: f64,

    /// How often the liveness timer looks at the last poll.
    pub liveness_check_ms: u64,

    /// Default deadline for server → client requests.
    pub request_timeout_ms: u64,

    /// Bound on delivering a disconnect notice.
    pub disconnect_wait_ms: u64,

    /// Deadline for an internal ping.
    pub ping_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_interval_ticks: 8,
            tick_ms: 50,
            timeout_multiplier: 20.0,
            liveness_check_ms: 200,
            request_timeout_ms: 10_000,
            disconnect_wait_ms: 5_000,
            ping_timeout_ms: 20_000,
        }
    }
}

impl SessionConfig {
    /// Wall-clock length of one poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.saturating_mul(u64::from(self.request_interval_ticks)))
    }

    /// Time without a poll after which a session counts as lost, or `None`
    /// when liveness checking is disabled. A product too large for a
    /// `Duration` also disables it.
    pub fn liveness_threshold(&self) -> Option<Duration> {
        if !self.timeout_multiplier.is_finite() {
            return None;
        }
        Duration::try_from_secs_f64(self.poll_interval().as_secs_f64() * self.timeout_multiplier).ok()
    }

    pub fn liveness_check_period(&self) -> Duration {
        Duration::from_millis(self.liveness_check_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn disconnect_wait(&self) -> Duration {
        Duration::from_millis(self.disconnect_wait_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

/// Client-side connection settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the server, e.g. "http://127.0.0.1:8080".
    pub server_url: String,

    /// Identity declared during the handshake.
    pub client_id: String,

    /// Consecutive failed polls before the connection is considered lost.
    pub failure_threshold: u32,

    /// Connection attempts before `connect` gives up.
    pub max_reconnect_attempts: u32,

    /// Cap on the reconnect delay.
    pub max_backoff_secs: u64,

    /// Deadline for one poll request.
    pub query_timeout_ms: u64,

    /// Deadline for a client → server request.
    pub request_timeout_ms: u64,

    /// Length of one scheduler tick.
    pub tick_ms: u64,

    /// Randomize reconnect delays.
    pub backoff_jitter: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            client_id: "script-bridge-client".to_string(),
            failure_threshold: 3,
            max_reconnect_attempts: 10,
            max_backoff_secs: 60,
            query_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
            tick_ms: 50,
            backoff_jitter: false,
        }
    }
}

impl ClientConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `tracing_subscriber` filter directive; `RUST_LOG` takes precedence.
    pub log_filter: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Scrape endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9100".to_string(),
        }
    }
}
