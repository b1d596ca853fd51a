//! HTTP route table.

pub mod legacy;
pub mod streamable;

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::{get, post};

use crate::health::{self, HealthResponse};
use crate::manager::SessionManager;
use crate::transport::SESSION_ID_HEADER;

/// Path of the streamable endpoint.
pub const MCP_PATH: &str = "/mcp";
/// Path of the legacy SSE stream endpoint.
pub const SSE_PATH: &str = "/sse";
/// Path of the legacy inbound message endpoint.
pub const MESSAGES_PATH: &str = "/messages";

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session manager.
    pub manager: Arc<SessionManager>,
}

/// Build the route table. `/health` is present only when enabled.
pub fn router(manager: Arc<SessionManager>) -> Router {
    let enable_health = manager.config().enable_health;

    let mut router = Router::new()
        .route(
            MCP_PATH,
            post(streamable::handle_post)
                .get(streamable::handle_get)
                .delete(streamable::handle_delete),
        )
        .route(SSE_PATH, get(legacy::handle_sse))
        .route(MESSAGES_PATH, post(legacy::handle_messages))
        .route("/ping", get(ping));

    if enable_health {
        router = router.route("/health", get(health_handler));
    }

    router.with_state(AppState { manager })
}

/// GET /ping
async fn ping() -> &'static str {
    "pong"
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.manager.streamable().len(),
        state.manager.legacy().len(),
    ))
}

/// Non-empty `mcp-session-id` header value.
pub(crate) fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::testing::MockServer;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app(enable_health: bool) -> Router {
        let config = SessionConfig {
            enable_health,
            ..SessionConfig::default()
        };
        router(SessionManager::new(config, MockServer::new()))
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let resp = app(true).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 100).await.unwrap();
        assert_eq!(&body[..], b"pong");
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app(true).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({ "ok": true, "streamableSessions": 0, "legacySseSessions": 0 })
        );
    }

    #[tokio::test]
    async fn health_absent_when_disabled() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app(false).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn empty_session_header_is_absent() {
        let mut headers = HeaderMap::new();
        assert!(session_header(&headers).is_none());
        let _ = headers.insert(SESSION_ID_HEADER, "".parse().unwrap());
        assert!(session_header(&headers).is_none());
        let _ = headers.insert(SESSION_ID_HEADER, "abc".parse().unwrap());
        assert_eq!(session_header(&headers), Some("abc"));
    }
}
