//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_sessions_active` (gauge): live sessions
//! - `bridge_sessions_created_total` / `bridge_sessions_destroyed_total` (counters)
//! - `bridge_queries_total` (counter): polls served, by result
//! - `bridge_client_requests_total` (counter): client → server requests, by outcome
//! - `bridge_server_requests_total` (counter): server → client requests, by outcome
//! - `bridge_poll_failures_total` / `bridge_reconnects_total` (counters, client side)

use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;

use crate::protocol::Outcome;

pub mod names {
    pub const SESSIONS_ACTIVE: &str = "bridge_sessions_active";
    pub const SESSIONS_CREATED: &str = "bridge_sessions_created_total";
    pub const SESSIONS_DESTROYED: &str = "bridge_sessions_destroyed_total";
    pub const QUERIES: &str = "bridge_queries_total";
    pub const CLIENT_REQUESTS: &str = "bridge_client_requests_total";
    pub const SERVER_REQUESTS: &str = "bridge_server_requests_total";
    pub const POLL_FAILURES: &str = "bridge_poll_failures_total";
    pub const RECONNECTS: &str = "bridge_reconnects_total";
}

/// Label for an outcome: "success" or the error reason.
fn outcome_label(outcome: &Outcome) -> &'static str {
    outcome.error_reason().map_or("success", |r| r.as_str())
}

#[inline]
pub fn session_created() {
    metrics::gauge!(names::SESSIONS_ACTIVE).increment(1.0);
    metrics::counter!(names::SESSIONS_CREATED).increment(1);
}

#[inline]
pub fn session_destroyed() {
    metrics::gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
    metrics::counter!(names::SESSIONS_DESTROYED).increment(1);
}

/// Record one `GET /query`; `result` is "ok" or "invalid_session".
#[inline]
pub fn query_served(result: &'static str) {
    metrics::counter!(names::QUERIES, "result" => result).increment(1);
}

#[inline]
pub fn client_request_handled(outcome: &Outcome) {
    metrics::counter!(names::CLIENT_REQUESTS, "outcome" => outcome_label(outcome)).increment(1);
}

#[inline]
pub fn server_request_settled(outcome: &Outcome) {
    metrics::counter!(names::SERVER_REQUESTS, "outcome" => outcome_label(outcome)).increment(1);
}

#[inline]
pub fn poll_failed() {
    metrics::counter!(names::POLL_FAILURES).increment(1);
}

#[inline]
pub fn reconnect_started() {
    metrics::counter!(names::RECONNECTS).increment(1);
}

/// Install the Prometheus recorder. Must run before any metric is recorded
/// for that metric to be exported.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Serve `/metrics` on `addr` from a background task.
pub async fn start_metrics_server(addr: SocketAddr, handle: PrometheusHandle) -> std::io::Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Metrics server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Metrics server error");
        }
    });

    Ok(())
}
