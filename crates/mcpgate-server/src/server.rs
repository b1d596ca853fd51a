//! `McpHttpServer`: the Axum listener that fronts the session manager.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{ServerConfig, SessionConfig};
use crate::errors::ServerError;
use crate::manager::SessionManager;
use crate::routes;
use crate::transport::{McpServer, SESSION_ID_HEADER};

const SIGNATURE_HEADER: &str = "x-server-signature";

/// HTTP server wrapping one [`SessionManager`].
pub struct McpHttpServer {
    config: ServerConfig,
    manager: Arc<SessionManager>,
}

impl McpHttpServer {
    /// Create a server whose sessions attach to `rpc`.
    pub fn new(config: ServerConfig, sessions: SessionConfig, rpc: Arc<dyn McpServer>) -> Self {
        Self {
            config,
            manager: SessionManager::new(sessions, rpc),
        }
    }

    /// Build the router with CORS, signature and tracing layers.
    pub fn router(&self) -> Router {
        routes::router(self.manager.clone())
            .layer(cors_layer(&self.config))
            .layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static(SIGNATURE_HEADER),
                signature_value(&self.config.server_signature),
            ))
            .layer(TraceLayer::new_for_http())
    }

    /// The session manager.
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind, start the reaper, and serve in the background.
    ///
    /// Closing the returned handle drains every session before the listener
    /// stops waiting on open connections, then joins the manager's
    /// background tasks.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        self.manager.spawn_reaper();

        let token = CancellationToken::new();
        let stop = token.clone();
        let drain = self.manager.clone();
        let manager = self.manager.clone();
        let app = self.router();

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    stop.cancelled().await;
                    let _ = drain.close_all_sessions().await;
                })
                .await;
            manager.shutdown().await;
            result
        });

        info!(%addr, "mcp server listening");
        Ok(ServerHandle {
            addr,
            token,
            task: Mutex::new(Some(task)),
        })
    }
}

/// Handle to a running listener.
pub struct ServerHandle {
    addr: SocketAddr,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl ServerHandle {
    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether a close has been requested.
    pub fn is_closing(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop accepting, drain sessions, and wait for the server task.
    /// Later calls wait for the first and then return `Ok`.
    pub async fn close(&self) -> Result<(), ServerError> {
        self.token.cancel();
        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };
        task.await??;
        info!(addr = %self.addr, "mcp server closed");
        Ok(())
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let session = HeaderName::from_static(SESSION_ID_HEADER);
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, session.clone()])
        .expose_headers([session]);
    if config.cors_allow_any_origin {
        layer.allow_origin(Any)
    } else {
        layer
    }
}

fn signature_value(signature: &str) -> HeaderValue {
    HeaderValue::from_str(signature).unwrap_or_else(|_| {
        warn!(signature, "server signature is not a valid header value, using default");
        HeaderValue::from_static("mcpgate")
    })
}
