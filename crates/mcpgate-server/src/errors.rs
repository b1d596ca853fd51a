//! Error types for the session layer.
//!
//! [`ApiError`] covers the client-protocol failures that route handlers
//! answer synchronously. [`TransportError`] and [`ConnectError`] describe
//! failures below the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::jsonrpc::{self, CONNECTION_ERROR};

/// Body message for a POST that carries neither a session id nor an initialize request.
pub const MISSING_SESSION_OR_INITIALIZE: &str = "Missing Mcp-Session-Id or initialize request";

/// Failures inside a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server half of the transport was already handed out.
    #[error("transport already connected")]
    AlreadyConnected,
    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
    /// The connected RPC server stopped reading.
    #[error("rpc server is no longer reading from the transport")]
    ServerGone,
    /// A message failed JSON-RPC validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// The RPC server could not attach to a transport.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The server declined the transport.
    #[error("rpc server refused the transport: {0}")]
    Refused(String),
    /// The transport could not be attached.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The HTTP server task ended abnormally.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Serving failed.
    #[error("http server failed: {0}")]
    Io(#[from] std::io::Error),
    /// The server task panicked or was aborted.
    #[error("http server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Client-protocol errors surfaced by route handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ApiError {
    /// `POST /mcp` without a session header and without an initialize body.
    #[error("Missing Mcp-Session-Id or initialize request")]
    MissingSessionOrInitialize,
    /// `GET`/`DELETE /mcp` without a session header.
    #[error("Missing Mcp-Session-Id")]
    MissingSessionHeader,
    /// `POST /messages` without a `sessionId` query parameter.
    #[error("Missing sessionId")]
    MissingSessionQuery,
    /// The referenced session is not registered.
    #[error("Session not found")]
    SessionNotFound,
    /// `POST /messages` names a legacy session that is not registered.
    #[error("Session not found")]
    LegacySessionNotFound,
    /// The RPC server failed to connect to a new transport.
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(self) -> StatusCode {
        match self {
            Self::MissingSessionOrInitialize
            | Self::MissingSessionHeader
            | Self::MissingSessionQuery => StatusCode::BAD_REQUEST,
            Self::SessionNotFound | Self::LegacySessionNotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::MissingSessionOrInitialize => (
                status,
                Json(jsonrpc::error_body(None, CONNECTION_ERROR, MISSING_SESSION_OR_INITIALIZE)),
            )
                .into_response(),
            Self::MissingSessionHeader
            | Self::MissingSessionQuery
            | Self::LegacySessionNotFound => {
                (status, self.to_string()).into_response()
            }
            Self::SessionNotFound | Self::Internal => {
                (status, Json(json!({ "error": self.to_string() }))).into_response()
            }
        }
    }
}
