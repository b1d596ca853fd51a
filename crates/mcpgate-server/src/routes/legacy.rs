//! Legacy push-channel handlers: `GET /sse` and `POST /messages`.
//!
//! The inbound route names its session in the query string, not a header.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{instrument, warn};

use super::AppState;
use crate::errors::ApiError;
use crate::transport::McpTransport;

/// Query string of `POST /messages`.
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    /// Legacy session id.
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// GET /sse: open a push channel, connect the RPC server, register the
/// session and start its heartbeat.
#[instrument(skip_all)]
pub async fn handle_sse(State(state): State<AppState>) -> Response {
    let manager = &state.manager;
    let (transport, body) = manager.legacy_transport();

    if let Err(err) = manager.server().connect(transport.clone()).await {
        warn!(error = %err, "rpc server failed to connect legacy sse transport");
        transport.close().await;
        return ApiError::Internal.into_response();
    }
    manager.register_legacy(&transport);

    let mut resp = Response::new(body);
    let headers = resp.headers_mut();
    let _ = headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    let _ = headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    let _ = headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    let _ = headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    resp
}

/// POST /messages?sessionId=...
#[instrument(skip_all, fields(session_id = query.session_id.as_deref()))]
pub async fn handle_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
    body: Bytes,
) -> Response {
    let Some(id) = query.session_id.as_deref().filter(|id| !id.is_empty()) else {
        return ApiError::MissingSessionQuery.into_response();
    };
    let Some(session) = state.manager.legacy().touch(id) else {
        return ApiError::LegacySessionNotFound.into_response();
    };
    session.transport().handle_post_message(&body).await
}
