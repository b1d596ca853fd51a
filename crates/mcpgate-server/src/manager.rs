//! Session manager: owns both registries, builds transports wired to them,
//! and runs the per-session background tasks.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::errors::TransportError;
use crate::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::reaper;
use crate::registry::{Session, SessionRegistry};
use crate::transport::sse::DEFAULT_MESSAGES_ENDPOINT;
use crate::transport::{
    McpServer, McpTransport, SseOptions, SseTransport, StreamableOptions, StreamableTransport,
    TransportKind,
};

/// Outcome of draining every session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Sessions whose close completed.
    pub closed: usize,
    /// Sessions whose close exceeded the per-session bound.
    pub timed_out: usize,
}

/// Process-wide session state.
pub struct SessionManager {
    config: SessionConfig,
    server: Arc<dyn McpServer>,
    streamable: Arc<SessionRegistry<StreamableTransport>>,
    legacy: Arc<SessionRegistry<SseTransport>>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl SessionManager {
    /// Create a manager with empty registries.
    pub fn new(config: SessionConfig, server: Arc<dyn McpServer>) -> Arc<Self> {
        Arc::new(Self {
            config,
            server,
            streamable: Arc::new(SessionRegistry::new(TransportKind::Streamable)),
            legacy: Arc::new(SessionRegistry::new(TransportKind::LegacySse)),
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Session options.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The RPC server sessions attach to.
    pub fn server(&self) -> &Arc<dyn McpServer> {
        &self.server
    }

    /// Streamable session registry.
    pub fn streamable(&self) -> &SessionRegistry<StreamableTransport> {
        &self.streamable
    }

    /// Legacy SSE session registry.
    pub fn legacy(&self) -> &SessionRegistry<SseTransport> {
        &self.legacy
    }

    /// Tracker for heartbeats, disconnect watchers, routers and the reaper.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Cancelled when the manager shuts down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build an unregistered streamable transport. It registers itself when
    /// its initialize request assigns the id, and unregisters on close.
    pub fn streamable_transport(&self) -> Arc<StreamableTransport> {
        let on_init = Arc::clone(&self.streamable);
        let on_close = Arc::clone(&self.streamable);
        StreamableTransport::new(StreamableOptions {
            session_id_generator: Box::new(|| uuid::Uuid::new_v4().to_string()),
            on_session_initialized: Some(Box::new(move |id, transport| {
                let _ = on_init.insert(id, transport);
                info!(session_id = %id, "streamable session registered");
            })),
            on_close: Some(Box::new(move |id| {
                if on_close.remove(id).is_some() {
                    info!(session_id = %id, "streamable session removed");
                }
            })),
            tasks: self.tasks.clone(),
        })
    }

    /// Build an unregistered legacy transport and its response body.
    pub fn legacy_transport(&self) -> (Arc<SseTransport>, Body) {
        let on_close = Arc::clone(&self.legacy);
        SseTransport::new(SseOptions {
            endpoint: DEFAULT_MESSAGES_ENDPOINT.to_string(),
            on_close: Some(Box::new(move |id| {
                if on_close.remove(id).is_some() {
                    info!(session_id = %id, "legacy sse session removed");
                }
            })),
            tasks: self.tasks.clone(),
        })
    }

    /// Register a connected legacy transport, start its heartbeat, and
    /// watch for the client going away.
    pub fn register_legacy(&self, transport: &Arc<SseTransport>) {
        let _ = self.legacy.insert(transport.id(), Arc::clone(transport));
        info!(session_id = %transport.id(), "legacy sse session registered");

        self.start_heartbeat(transport);
        if let Err(err) = self.watch_disconnect(transport) {
            warn!(session_id = %transport.id(), error = %err, "failed to register disconnect handler");
        }
    }

    fn start_heartbeat(&self, transport: &Arc<SseTransport>) {
        let transport = Arc::clone(transport);
        let interval = self.config.legacy_keep_alive;
        let _ = self.tasks.spawn(async move {
            let result =
                run_heartbeat(transport.sink().clone(), interval, transport.closed_token()).await;
            if result != HeartbeatResult::Cancelled {
                debug!(session_id = %transport.id(), ?result, "heartbeat stopped, closing session");
                transport.close().await;
            }
        });
    }

    fn watch_disconnect(&self, transport: &Arc<SseTransport>) -> Result<(), TransportError> {
        if transport.is_closed() || transport.sink().is_destroyed() {
            return Err(TransportError::Closed);
        }
        let socket_closed = transport.sink().socket_closed();
        let closed = transport.closed_token();
        let transport = Arc::clone(transport);
        let _ = self.tasks.spawn(async move {
            tokio::select! {
                () = socket_closed => {
                    debug!(session_id = %transport.id(), "legacy sse client disconnected");
                    transport.close().await;
                }
                () = closed.cancelled() => {}
            }
        });
        Ok(())
    }

    /// Start the reaper on the task tracker.
    pub fn spawn_reaper(self: &Arc<Self>) {
        let _ = self.tasks.spawn(reaper::run_reaper(
            Arc::clone(self),
            self.config.reaper_interval,
            self.cancel.clone(),
        ));
    }

    /// Close every session registered right now, each bounded by
    /// `session_close_timeout`. Every call takes a fresh snapshot, so a
    /// session created after an earlier drain is still closed; sessions
    /// another drain already closed return immediately.
    pub async fn close_all_sessions(&self) -> DrainReport {
        let streamable = self.streamable.snapshot();
        let legacy = self.legacy.snapshot();
        info!(
            streamable = streamable.len(),
            legacy_sse = legacy.len(),
            "closing all sessions"
        );

        let timeout = self.config.session_close_timeout;
        let streamable_closes = streamable.iter().map(|s| close_session(s, timeout));
        let legacy_closes = legacy.iter().map(|s| async move {
            let closed = close_session(s, timeout).await;
            s.transport().sink().destroy();
            closed
        });
        let (a, b) = tokio::join!(
            futures::future::join_all(streamable_closes),
            futures::future::join_all(legacy_closes)
        );

        let mut report = DrainReport::default();
        for closed in a.into_iter().chain(b) {
            if closed {
                report.closed += 1;
            } else {
                report.timed_out += 1;
            }
        }
        info!(closed = report.closed, timed_out = report.timed_out, "sessions drained");
        report
    }

    /// Stop the reaper, drain sessions, and join every background task.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let _ = self.close_all_sessions().await;
        let _ = self.tasks.close();
        self.tasks.wait().await;
        debug!("session manager stopped");
    }
}

/// Close one session, bounded by `timeout`. Returns `false` on timeout.
pub(crate) async fn close_session<T: McpTransport>(session: &Session<T>, timeout: Duration) -> bool {
    if tokio::time::timeout(timeout, session.transport().close())
        .await
        .is_ok()
    {
        true
    } else {
        warn!(
            session_id = %session.id(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "session close timed out"
        );
        false
    }
}
