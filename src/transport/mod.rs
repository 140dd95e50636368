//! Outbound HTTP for the client side.
//!
//! # Design Decisions
//! - The connection state machine only sees [`Transport`]; the HTTP stack is pluggable
//! - A non-2xx status is a failure carrying status and body
//! - `cancel_all` aborts every call in flight at that moment and never fails

mod http_client;

use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;

pub use http_client::ReqwestTransport;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of a header, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Minimal HTTP client contract used by the bridge client.
///
/// Returned futures own everything they need, so callers may spawn them.
pub trait Transport: Send + Sync + 'static {
    fn get(&self, path: &str, options: RequestOptions) -> BoxFuture<'static, Result<String, TransportError>>;

    /// POST a JSON body.
    fn post(
        &self,
        path: &str,
        body: String,
        options: RequestOptions,
    ) -> BoxFuture<'static, Result<String, TransportError>>;

    /// Abort every call currently in flight.
    fn cancel_all(&self, reason: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = RequestOptions::new()
            .header("Session-Id", "abc")
            .param("sessionId", "abc")
            .timeout(Duration::from_millis(250));
        assert_eq!(options.header_value("session-id"), Some("abc"));
        assert_eq!(options.params.len(), 1);
        assert_eq!(options.timeout, Some(Duration::from_millis(250)));
    }
}
