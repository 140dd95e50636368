//! Endpoint handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::http::server::AppState;
use crate::observability::metrics;
use crate::protocol::{
    ClientMessage, ClientRequest, ClientResponse, ErrorReason, Outcome, ServerResponse,
    SessionCreated, SessionId, SESSION_ID_HEADER, SESSION_ID_PARAM,
};
use crate::server::{ServerCore, ServerEvent, Session};

fn invalid_session() -> Response {
    Json(ServerResponse::failure(
        ErrorReason::InvalidSession,
        "Session is invalid",
    ))
    .into_response()
}

/// Session id from the `session-id` header, else the `sessionId` query parameter.
fn session_id(headers: &HeaderMap, query: Option<&str>) -> Option<SessionId> {
    let from_header = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let raw = from_header.or_else(|| {
        query.and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == SESSION_ID_PARAM)
                .map(|(_, value)| value.into_owned())
        })
    })?;
    raw.trim().parse().ok()
}

/// `GET /new`
pub(crate) async fn new_session(State(state): State<AppState>) -> Response {
    let session = Session::create(&state.core);
    let created = SessionCreated {
        session_id: session.id(),
        request_interval_ticks: state.core.settings.load().request_interval_ticks,
    };

    let response = match serde_json::to_value(created) {
        Ok(data) => ServerResponse::success(data),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode session");
            session.destroy();
            ServerResponse::failure(ErrorReason::InternalError, e.to_string())
        }
    };
    Json(response).into_response()
}

/// `GET /query`
pub(crate) async fn poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let session = session_id(&headers, query.as_deref()).and_then(|id| state.core.registry.get(&id));
    let Some(session) = session else {
        metrics::query_served("invalid_session");
        return invalid_session();
    };

    let requests = session.drain_queue();
    metrics::query_served("ok");
    tracing::trace!(session_id = %session.id(), count = requests.len(), "Serving poll");

    for request in &requests {
        state.core.events.emit(ServerEvent::RequestSend {
            session: session.clone(),
            request: request.clone(),
        });
    }
    state
        .core
        .events
        .emit(ServerEvent::QueryReceive { session });

    Json(requests).into_response()
}

/// `POST /query`
pub(crate) async fn submit(State(state): State<AppState>, body: Bytes) -> Response {
    let message = match ClientMessage::decode(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting malformed payload");
            return Json(ServerResponse::failure(
                ErrorReason::InvalidPayload,
                format!("Invalid payload: {e}"),
            ))
            .into_response();
        }
    };

    let Some(session) = state.core.registry.get(&message.session_id()) else {
        return invalid_session();
    };

    match message {
        ClientMessage::Request(request) => handle_request(&state.core, session, request).await,
        ClientMessage::Response(response) => {
            handle_response(&state.core, session, response);
            StatusCode::OK.into_response()
        }
    }
}

async fn handle_request(core: &Arc<ServerCore>, session: Arc<Session>, request: ClientRequest) -> Response {
    core.events.emit(ServerEvent::RequestReceive {
        session: session.clone(),
        request: request.clone(),
    });

    let channel_id = request.channel_id;
    let outcome = if !channel_id.is_internal() && !session.is_connected() {
        Outcome::failure(
            ErrorReason::InvalidSession,
            "Session has not completed the handshake",
        )
    } else {
        core.dispatcher
            .handle(&channel_id, request.data, session.clone())
            .await
    };
    metrics::client_request_handled(&outcome);

    let response = ServerResponse::new(outcome);
    core.events.emit(ServerEvent::ResponseSend {
        session,
        response: response.clone(),
    });
    Json(response).into_response()
}

fn handle_response(core: &Arc<ServerCore>, session: Arc<Session>, response: ClientResponse) {
    if session.resolve(response.clone()) {
        core.events
            .emit(ServerEvent::ResponseReceive { session, response });
    }
}
