//! Streamable HTTP transport.
//!
//! One transport per session. Each POST forwards its messages to the
//! connected RPC server and waits for the responses matching its request
//! ids; server messages that answer no pending request go to the session's
//! standalone GET stream. The session id is generated lazily when the first
//! initialize request arrives, and the `on_session_initialized` callback
//! fires at that moment.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use super::{
    CloseCallback, LinkEnds, McpTransport, SESSION_ID_HEADER, ServerLink, TransportKind, sse,
    take_link_from,
};
use crate::errors::{ApiError, TransportError};
use crate::jsonrpc::{
    self, CONNECTION_ERROR, INTERNAL_ERROR, INVALID_REQUEST, JsonRpcMessage, MessageKind,
    PARSE_ERROR, RequestId,
};

const STREAM_CAPACITY: usize = 64;

/// Produces a fresh session id.
pub type SessionIdGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Fired once, when the initialize request assigns the session id.
pub type SessionInitializedCallback = Box<dyn FnOnce(&str, Arc<StreamableTransport>) + Send>;

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcMessage>>>>;
type StreamSlot = Arc<Mutex<Option<mpsc::Sender<Bytes>>>>;

/// Construction options for [`StreamableTransport`].
pub struct StreamableOptions {
    /// Session id source. Called at most once per transport.
    pub session_id_generator: SessionIdGenerator,
    /// Registration hook.
    pub on_session_initialized: Option<SessionInitializedCallback>,
    /// Removal hook.
    pub on_close: Option<CloseCallback>,
    /// Tracker the outbound router task is spawned on.
    pub tasks: TaskTracker,
}

impl Default for StreamableOptions {
    fn default() -> Self {
        Self {
            session_id_generator: Box::new(|| uuid::Uuid::new_v4().to_string()),
            on_session_initialized: None,
            on_close: None,
            tasks: TaskTracker::new(),
        }
    }
}

/// A protocol-level rejection written by the transport itself.
#[derive(Clone, Debug)]
pub struct Rejection {
    status: StatusCode,
    body: Value,
}

impl Rejection {
    fn new(status: StatusCode, code: i64, message: impl AsRef<str>) -> Self {
        Self {
            status,
            body: jsonrpc::error_body(None, code, message.as_ref()),
        }
    }

    fn not_initialized() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            CONNECTION_ERROR,
            "Bad Request: Server not initialized",
        )
    }

    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Bidirectional transport keyed by the `mcp-session-id` header.
pub struct StreamableTransport {
    me: Weak<Self>,
    session_id: OnceLock<String>,
    generator: SessionIdGenerator,
    on_initialized: Mutex<Option<SessionInitializedCallback>>,
    on_close: Mutex<Option<CloseCallback>>,
    to_server: mpsc::Sender<JsonRpcMessage>,
    link: Mutex<Option<ServerLink>>,
    pending: Pending,
    standalone: StreamSlot,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl StreamableTransport {
    /// Build a transport and start its outbound router.
    pub fn new(options: StreamableOptions) -> Arc<Self> {
        let StreamableOptions {
            session_id_generator,
            on_session_initialized,
            on_close,
            tasks,
        } = options;

        let cancel = CancellationToken::new();
        let LinkEnds {
            to_server,
            from_server,
            link,
        } = LinkEnds::new(cancel.clone());
        let pending: Pending = Arc::default();
        let standalone: StreamSlot = Arc::default();

        let _ = tasks.spawn(route_outbound(
            from_server,
            pending.clone(),
            standalone.clone(),
            cancel.clone(),
        ));

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            session_id: OnceLock::new(),
            generator: session_id_generator,
            on_initialized: Mutex::new(on_session_initialized),
            on_close: Mutex::new(on_close),
            to_server,
            link,
            pending,
            standalone,
            closed: AtomicBool::new(false),
            cancel,
        })
    }

    /// Whether an initialize request has assigned a session id.
    pub fn is_initialized(&self) -> bool {
        self.session_id.get().is_some()
    }

    /// Handle a POST body (single message or batch) and write the HTTP reply.
    pub async fn handle_post(&self, body: &[u8]) -> Response {
        if self.is_closed() {
            return ApiError::SessionNotFound.into_response();
        }

        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(err) => {
                return Rejection::new(
                    StatusCode::BAD_REQUEST,
                    PARSE_ERROR,
                    format!("Parse error: {err}"),
                )
                .into_response();
            }
        };
        let (messages, batch) = match jsonrpc::parse_body(value) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Rejection::new(
                    StatusCode::BAD_REQUEST,
                    INVALID_REQUEST,
                    format!("Invalid Request: {err}"),
                )
                .into_response();
            }
        };

        if messages.iter().any(JsonRpcMessage::is_initialize) {
            if let Err(rejection) = self.initialize(messages.len()) {
                return rejection.into_response();
            }
        } else if !self.is_initialized() {
            return Rejection::not_initialized().into_response();
        }

        let waiters = self.register_waiters(&messages);

        for message in messages {
            if self.to_server.send(message).await.is_err() {
                self.forget(&waiters);
                return Rejection::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR,
                    "Connection closed",
                )
                .into_response();
            }
        }

        if waiters.is_empty() {
            return self.reply(StatusCode::ACCEPTED, None);
        }

        let (ids, receivers): (Vec<_>, Vec<_>) = waiters.into_iter().unzip();
        let replies = futures::future::join_all(receivers).await;
        let mut responses: Vec<Value> = ids
            .iter()
            .zip(replies)
            .map(|(id, reply)| match reply {
                Ok(message) => message.into_value(),
                Err(_) => jsonrpc::error_body(Some(id), INTERNAL_ERROR, "Connection closed"),
            })
            .collect();

        let body = if batch {
            Value::Array(responses)
        } else {
            responses.pop().unwrap_or(Value::Null)
        };
        self.reply(StatusCode::OK, Some(&body))
    }

    /// Open the standalone server-to-client stream.
    pub fn handle_get(&self) -> Response {
        if self.is_closed() {
            return ApiError::SessionNotFound.into_response();
        }
        if !self.is_initialized() {
            return Rejection::not_initialized().into_response();
        }

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        {
            let mut slot = self.standalone.lock();
            if slot.as_ref().is_some_and(|open| !open.is_closed()) {
                return Rejection::new(
                    StatusCode::CONFLICT,
                    CONNECTION_ERROR,
                    "Conflict: Only one SSE stream is allowed per session",
                )
                .into_response();
            }
            *slot = Some(tx);
        }

        let stream = ReceiverStream::new(rx)
            .map(Ok::<_, Infallible>)
            .take_until(self.cancel.clone().cancelled_owned());
        let mut resp = Response::new(Body::from_stream(stream));
        let _ = resp.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        self.stamp_session(&mut resp);
        resp
    }

    /// Validate a teardown request. The caller closes the transport afterwards.
    pub fn handle_delete(&self) -> Result<(), Rejection> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Rejection::not_initialized())
        }
    }

    /// Number of requests awaiting a server response.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    fn initialize(&self, message_count: usize) -> Result<(), Rejection> {
        if self.is_initialized() {
            return Err(Rejection::new(
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
                "Invalid Request: Server already initialized",
            ));
        }
        if message_count > 1 {
            return Err(Rejection::new(
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
                "Invalid Request: Only one initialization request is allowed",
            ));
        }

        let id = (self.generator)();
        if self.session_id.set(id.clone()).is_err() {
            return Err(Rejection::new(
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
                "Invalid Request: Server already initialized",
            ));
        }
        debug!(session_id = %id, "streamable session initialized");

        let callback = self.on_initialized.lock().take();
        if let (Some(callback), Some(me)) = (callback, self.me.upgrade()) {
            callback(&id, me);
        }
        Ok(())
    }

    fn register_waiters(
        &self,
        messages: &[JsonRpcMessage],
    ) -> Vec<(RequestId, oneshot::Receiver<JsonRpcMessage>)> {
        let mut pending = self.pending.lock();
        messages
            .iter()
            .filter(|m| m.kind() == MessageKind::Request)
            .filter_map(JsonRpcMessage::id)
            .map(|id| {
                let (tx, rx) = oneshot::channel();
                let _ = pending.insert(id.clone(), tx);
                (id.clone(), rx)
            })
            .collect()
    }

    fn forget(&self, waiters: &[(RequestId, oneshot::Receiver<JsonRpcMessage>)]) {
        let mut pending = self.pending.lock();
        for (id, _) in waiters {
            let _ = pending.remove(id);
        }
    }

    fn reply(&self, status: StatusCode, body: Option<&Value>) -> Response {
        let mut resp = match body {
            Some(body) => (status, Json(body)).into_response(),
            None => status.into_response(),
        };
        self.stamp_session(&mut resp);
        resp
    }

    fn stamp_session(&self, resp: &mut Response) {
        if let Some(value) = self
            .session_id
            .get()
            .and_then(|id| HeaderValue::from_str(id).ok())
        {
            let _ = resp.headers_mut().insert(SESSION_ID_HEADER, value);
        }
    }
}

#[async_trait]
impl McpTransport for StreamableTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streamable
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.get().cloned()
    }

    fn take_link(&self) -> Result<ServerLink, TransportError> {
        take_link_from(&self.link, self.is_closed())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        // Dropping the senders answers every waiter with "Connection closed".
        self.pending.lock().clear();
        drop(self.standalone.lock().take());

        let callback = self.on_close.lock().take();
        if let (Some(callback), Some(id)) = (callback, self.session_id.get()) {
            callback(id);
        }
        debug!(session_id = ?self.session_id.get(), "streamable transport closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Deliver server messages to pending POSTs, else to the standalone stream.
async fn route_outbound(
    mut from_server: mpsc::Receiver<JsonRpcMessage>,
    pending: Pending,
    standalone: StreamSlot,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => break,
            message = from_server.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if message.kind() == MessageKind::Response {
            let waiter = message.id().and_then(|id| pending.lock().remove(id));
            if let Some(waiter) = waiter {
                let _ = waiter.send(message);
                continue;
            }
        }

        let stream = standalone.lock().clone();
        let Some(stream) = stream else {
            debug!(method = ?message.method(), "no standalone stream, dropping server message");
            continue;
        };
        if stream.send(sse::message_frame(&message)).await.is_err() {
            let mut slot = standalone.lock();
            if slot.as_ref().is_some_and(|open| open.same_channel(&stream)) {
                *slot = None;
            }
            debug!("standalone stream disconnected");
        }
    }
}
