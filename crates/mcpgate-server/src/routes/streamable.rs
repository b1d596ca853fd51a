//! `POST`/`GET`/`DELETE /mcp` handlers for the streamable transport.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::{instrument, warn};

use super::{AppState, session_header};
use crate::errors::ApiError;
use crate::jsonrpc::is_initialize_request;
use crate::transport::McpTransport;

/// POST /mcp
///
/// Known session: forward. No session header and an initialize body: build
/// a transport, connect the RPC server, and let the transport register the
/// session once the initialize request assigns its id.
#[instrument(skip_all, fields(session_id = session_header(&headers)))]
pub async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let manager = &state.manager;

    if let Some(id) = session_header(&headers) {
        let Some(session) = manager.streamable().touch(id) else {
            return ApiError::SessionNotFound.into_response();
        };
        return session.transport().handle_post(&body).await;
    }

    let is_initialize = serde_json::from_slice::<Value>(&body)
        .ok()
        .is_some_and(|value| is_initialize_request(&value));
    if !is_initialize {
        return ApiError::MissingSessionOrInitialize.into_response();
    }

    let transport = manager.streamable_transport();
    if let Err(err) = manager.server().connect(transport.clone()).await {
        warn!(error = %err, "rpc server failed to connect streamable transport");
        transport.close().await;
        return ApiError::Internal.into_response();
    }
    transport.handle_post(&body).await
}

/// GET /mcp: open the session's server-to-client stream.
#[instrument(skip_all, fields(session_id = session_header(&headers)))]
pub async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_header(&headers) else {
        return ApiError::MissingSessionHeader.into_response();
    };
    let Some(session) = state.manager.streamable().touch(id) else {
        return ApiError::SessionNotFound.into_response();
    };

    let mut resp = session.transport().handle_get();
    if resp.status().is_success() {
        let headers = resp.headers_mut();
        let _ = headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-transform"),
        );
        let _ = headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        let _ = headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    }
    resp
}

/// DELETE /mcp: forward the teardown, close the transport, answer 204.
#[instrument(skip_all, fields(session_id = session_header(&headers)))]
pub async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_header(&headers) else {
        return ApiError::MissingSessionHeader.into_response();
    };
    let Some(session) = state.manager.streamable().touch(id) else {
        return ApiError::SessionNotFound.into_response();
    };

    if let Err(rejection) = session.transport().handle_delete() {
        return rejection.into_response();
    }
    session.transport().close().await;
    StatusCode::NO_CONTENT.into_response()
}
