//! Router assembly.

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ListenerConfig;
use crate::http::handlers;
use crate::server::ServerCore;

/// Header carrying the per-request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) core: Arc<ServerCore>,
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub(crate) fn build_router(core: Arc<ServerCore>, config: &ListenerConfig) -> Router {
    let state = AppState { core };

    Router::new()
        .route("/new", get(handlers::new_session))
        .route("/query", get(handlers::poll).post(handlers::submit))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs))),
        )
}
