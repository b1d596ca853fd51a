//! `/health` endpoint.

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `true` when the server is answering.
    pub ok: bool,
    /// Live streamable sessions.
    pub streamable_sessions: usize,
    /// Live legacy SSE sessions.
    pub legacy_sse_sessions: usize,
}

/// Build a health response from the registry sizes.
pub fn health_check(streamable_sessions: usize, legacy_sse_sessions: usize) -> HealthResponse {
    HealthResponse {
        ok: true,
        streamable_sessions,
        legacy_sse_sessions,
    }
}
