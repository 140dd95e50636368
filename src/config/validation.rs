//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ticks and timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Pure function: BridgeConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::BridgeConfig;

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed config.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    let session = &config.session;
    for (field, value) in [
        ("session.request_interval_ticks", u64::from(session.request_interval_ticks)),
        ("session.tick_ms", session.tick_ms),
        ("session.liveness_check_ms", session.liveness_check_ms),
        ("session.request_timeout_ms", session.request_timeout_ms),
        ("session.disconnect_wait_ms", session.disconnect_wait_ms),
        ("session.ping_timeout_ms", session.ping_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if session.timeout_multiplier.is_nan() || session.timeout_multiplier <= 0.0 {
        errors.push(ValidationError::new(
            "session.timeout_multiplier",
            "must be a positive number or inf",
        ));
    } else if session.timeout_multiplier.is_finite() && session.liveness_threshold().is_none() {
        errors.push(ValidationError::new(
            "session.timeout_multiplier",
            "too large for the poll interval; use inf to disable liveness",
        ));
    }

    let client = &config.client;
    match Url::parse(&client.server_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            "client.server_url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("client.server_url", e.to_string())),
    }
    if client.client_id.trim().is_empty() {
        errors.push(ValidationError::new("client.client_id", "must not be empty"));
    }
    for (field, value) in [
        ("client.failure_threshold", u64::from(client.failure_threshold)),
        ("client.max_backoff_secs", client.max_backoff_secs),
        ("client.query_timeout_ms", client.query_timeout_ms),
        ("client.request_timeout_ms", client.request_timeout_ms),
        ("client.tick_ms", client.tick_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&BridgeConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = BridgeConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.session.request_interval_ticks = 0;
        config.session.timeout_multiplier = f64::NAN;
        config.client.server_url = "ftp://example.com".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "session.request_interval_ticks",
                "session.timeout_multiplier",
                "client.server_url",
            ]
        );
    }

    #[test]
    fn test_infinite_multiplier_is_valid() {
        let mut config = BridgeConfig::default();
        config.session.timeout_multiplier = f64::INFINITY;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_oversized_multiplier_is_rejected() {
        let mut config = BridgeConfig::default();
        config.session.timeout_multiplier = 1e300;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "session.timeout_multiplier");
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = BridgeConfig::default();
        config.observability.metrics_address = "nope".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
