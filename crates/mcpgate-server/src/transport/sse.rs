//! Legacy HTTP+SSE push transport.
//!
//! The server writes to a long-lived `text/event-stream` response; the
//! client posts its messages to a separate endpoint that names the session
//! in the query string. The first frame on the stream tells the client
//! where to post.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tokio_util::task::TaskTracker;
use tracing::debug;

use super::{CloseCallback, LinkEnds, McpTransport, ServerLink, TransportKind, take_link_from};
use crate::errors::TransportError;
use crate::jsonrpc::JsonRpcMessage;

const SINK_CAPACITY: usize = 64;

/// Default path clients post legacy messages to.
pub const DEFAULT_MESSAGES_ENDPOINT: &str = "/messages";

/// `event: endpoint` frame announcing the message endpoint.
pub fn endpoint_frame(endpoint: &str) -> Bytes {
    Bytes::from(format!("event: endpoint\ndata: {endpoint}\n\n"))
}

/// `event: message` frame carrying one JSON-RPC message.
pub fn message_frame(message: &JsonRpcMessage) -> Bytes {
    Bytes::from(format!("event: message\ndata: {}\n\n", message.to_json()))
}

/// Keep-alive comment frame.
pub fn keepalive_frame(unix_millis: i64) -> Bytes {
    Bytes::from(format!(": ping {unix_millis}\n\n"))
}

/// A frame could not be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The stream was ended, destroyed, or the client went away.
    #[error("sse stream is gone")]
    Gone,
    /// The client is not reading fast enough.
    #[error("sse stream buffer is full")]
    Full,
}

/// Write side of an SSE response body.
pub struct SseSink {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    ended: AtomicBool,
    destroyed: AtomicBool,
    kill: CancellationToken,
    socket_closed: CancellationToken,
}

impl SseSink {
    /// Create a sink and the response body it feeds.
    pub fn channel() -> (Arc<Self>, Body) {
        let (tx, rx) = mpsc::channel::<Bytes>(SINK_CAPACITY);
        let kill = CancellationToken::new();
        let socket_closed = CancellationToken::new();

        // Fires when hyper drops the body: client abort, socket close, or end of stream.
        let guard = socket_closed.clone().drop_guard();
        let stream = ReceiverStream::new(rx)
            .take_until(kill.clone().cancelled_owned())
            .map(move |frame| {
                let _ = &guard;
                Ok::<_, Infallible>(frame)
            });

        let sink = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            ended: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            kill,
            socket_closed,
        });
        (sink, Body::from_stream(stream))
    }

    fn sender(&self) -> Result<mpsc::Sender<Bytes>, SinkError> {
        if self.is_destroyed() {
            return Err(SinkError::Gone);
        }
        self.tx.lock().clone().ok_or(SinkError::Gone)
    }

    /// Write without waiting. A full buffer is reported, not awaited.
    pub fn try_write(&self, frame: Bytes) -> Result<(), SinkError> {
        self.sender()?.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Gone,
        })
    }

    /// Write, waiting for buffer space.
    pub async fn write(&self, frame: Bytes) -> Result<(), SinkError> {
        self.sender()?.send(frame).await.map_err(|_| SinkError::Gone)
    }

    /// Finish the stream after buffered frames drain.
    pub fn end(&self) {
        self.ended.store(true, Ordering::Release);
        drop(self.tx.lock().take());
    }

    /// Tear the stream down immediately, discarding buffered frames.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        drop(self.tx.lock().take());
        self.kill.cancel();
    }

    /// Whether the stream was ended gracefully.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Whether the stream was destroyed or the client's socket is gone.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire) || self.socket_closed.is_cancelled()
    }

    /// Resolves once the response body has been dropped.
    pub fn socket_closed(&self) -> WaitForCancellationFutureOwned {
        self.socket_closed.clone().cancelled_owned()
    }
}

/// Construction options for [`SseTransport`].
pub struct SseOptions {
    /// Path announced in the endpoint frame.
    pub endpoint: String,
    /// Removal hook.
    pub on_close: Option<CloseCallback>,
    /// Tracker the outbound router task is spawned on.
    pub tasks: TaskTracker,
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_MESSAGES_ENDPOINT.to_string(),
            on_close: None,
            tasks: TaskTracker::new(),
        }
    }
}

/// Push transport keyed by the `sessionId` query parameter.
pub struct SseTransport {
    session_id: String,
    sink: Arc<SseSink>,
    to_server: mpsc::Sender<JsonRpcMessage>,
    link: Mutex<Option<ServerLink>>,
    on_close: Mutex<Option<CloseCallback>>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl SseTransport {
    /// Build a transport with a fresh session id. Returns the transport and
    /// the response body, which already carries the endpoint frame.
    pub fn new(options: SseOptions) -> (Arc<Self>, Body) {
        let SseOptions {
            endpoint,
            on_close,
            tasks,
        } = options;

        let session_id = uuid::Uuid::new_v4().to_string();
        let (sink, body) = SseSink::channel();
        if sink
            .try_write(endpoint_frame(&format!("{endpoint}?sessionId={session_id}")))
            .is_err()
        {
            debug!(session_id = %session_id, "endpoint frame not written");
        }

        let cancel = CancellationToken::new();
        let LinkEnds {
            to_server,
            from_server,
            link,
        } = LinkEnds::new(cancel.clone());
        let _ = tasks.spawn(route_outbound(from_server, sink.clone(), cancel.clone()));

        let transport = Arc::new(Self {
            session_id,
            sink,
            to_server,
            link,
            on_close: Mutex::new(on_close),
            closed: AtomicBool::new(false),
            cancel,
        });
        (transport, body)
    }

    /// Session id (assigned at construction).
    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// The underlying stream.
    pub fn sink(&self) -> &Arc<SseSink> {
        &self.sink
    }

    /// Cancelled when the transport closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept one client message posted to the message endpoint.
    pub async fn handle_post_message(&self, body: &[u8]) -> Response {
        if self.is_closed() || self.sink.is_destroyed() {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SSE connection not established",
            )
                .into_response();
        }

        let message = match serde_json::from_slice(body)
            .map_err(|err| TransportError::InvalidMessage(err.to_string()))
            .and_then(JsonRpcMessage::parse)
        {
            Ok(message) => message,
            Err(err) => {
                debug!(session_id = %self.session_id, error = %err, "rejecting legacy message");
                return (StatusCode::BAD_REQUEST, "Invalid message").into_response();
            }
        };

        if self.to_server.send(message).await.is_err() {
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
        (StatusCode::OK, "Accepted").into_response()
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LegacySse
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }

    fn take_link(&self) -> Result<ServerLink, TransportError> {
        take_link_from(&self.link, self.is_closed())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        self.sink.end();

        let callback = self.on_close.lock().take();
        if let Some(callback) = callback {
            callback(&self.session_id);
        }
        debug!(session_id = %self.session_id, "legacy sse transport closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn route_outbound(
    mut from_server: mpsc::Receiver<JsonRpcMessage>,
    sink: Arc<SseSink>,
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
        if sink.write(message_frame(&message)).await.is_err() {
            debug!("legacy sse stream gone, stopping outbound routing");
            break;
        }
    }
}
