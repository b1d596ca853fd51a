//! Transport adapters between HTTP and a connected RPC server.
//!
//! Both families expose the same server-facing surface: the RPC server
//! calls [`McpTransport::take_link`] once during `connect` and then reads
//! client messages from [`ServerLink::incoming`] and writes its own
//! messages to [`ServerLink::outgoing`]. Route handlers only rely on the
//! shared `close()` capability beyond the family-specific entry points.

pub mod sse;
pub mod streamable;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{ConnectError, TransportError};
use crate::jsonrpc::JsonRpcMessage;

pub use sse::{SinkError, SseOptions, SseSink, SseTransport};
pub use streamable::{Rejection, StreamableOptions, StreamableTransport};

/// Capacity of each direction of a [`ServerLink`].
const LINK_CAPACITY: usize = 64;

/// Header carrying the streamable session id.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Transport family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Bidirectional transport keyed by the `mcp-session-id` header.
    Streamable,
    /// One-way push channel keyed by the `sessionId` query parameter.
    LegacySse,
}

impl TransportKind {
    /// Metric/log label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Streamable => "streamable",
            Self::LegacySse => "legacy_sse",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server half of a transport.
pub struct ServerLink {
    /// Messages from the client, in arrival order.
    pub incoming: mpsc::Receiver<JsonRpcMessage>,
    /// Messages to the client.
    pub outgoing: mpsc::Sender<JsonRpcMessage>,
    /// Cancelled when the transport closes.
    pub closed: CancellationToken,
}

/// Callback fired once when a transport closes, with its session id.
pub type CloseCallback = Box<dyn FnOnce(&str) + Send>;

/// A transport a [`McpServer`] can attach to.
#[async_trait]
pub trait McpTransport: Send + Sync + 'static {
    /// Transport family.
    fn kind(&self) -> TransportKind;

    /// Session id, once assigned.
    fn session_id(&self) -> Option<String>;

    /// Hand out the server half. Succeeds once.
    fn take_link(&self) -> Result<ServerLink, TransportError>;

    /// Close the transport. Idempotent: later calls return immediately.
    async fn close(&self);

    /// Whether `close()` has run.
    fn is_closed(&self) -> bool;
}

/// The RPC server a session attaches to. Opaque to this crate beyond
/// `connect`.
#[async_trait]
pub trait McpServer: Send + Sync + 'static {
    /// Attach to `transport` and start driving its message exchange.
    async fn connect(&self, transport: Arc<dyn McpTransport>) -> Result<(), ConnectError>;
}

/// Transport-side ends of a link.
pub(crate) struct LinkEnds {
    /// Forward client messages to the server.
    pub to_server: mpsc::Sender<JsonRpcMessage>,
    /// Receive server messages for routing to the client.
    pub from_server: mpsc::Receiver<JsonRpcMessage>,
    /// Server half, held until `take_link`.
    pub link: Mutex<Option<ServerLink>>,
}

impl LinkEnds {
    pub(crate) fn new(closed: CancellationToken) -> Self {
        let (to_server, incoming) = mpsc::channel(LINK_CAPACITY);
        let (outgoing, from_server) = mpsc::channel(LINK_CAPACITY);
        Self {
            to_server,
            from_server,
            link: Mutex::new(Some(ServerLink {
                incoming,
                outgoing,
                closed,
            })),
        }
    }
}

/// Take the server half out of `slot`.
pub(crate) fn take_link_from(
    slot: &Mutex<Option<ServerLink>>,
    closed: bool,
) -> Result<ServerLink, TransportError> {
    if closed {
        return Err(TransportError::Closed);
    }
    slot.lock().take().ok_or(TransportError::AlreadyConnected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels() {
        assert_eq!(TransportKind::Streamable.as_str(), "streamable");
        assert_eq!(TransportKind::LegacySse.to_string(), "legacy_sse");
    }

    #[tokio::test]
    async fn link_is_taken_once() {
        let ends = LinkEnds::new(CancellationToken::new());
        assert!(take_link_from(&ends.link, false).is_ok());
        assert!(matches!(
            take_link_from(&ends.link, false),
            Err(TransportError::AlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn closed_link_cannot_be_taken() {
        let ends = LinkEnds::new(CancellationToken::new());
        assert!(matches!(
            take_link_from(&ends.link, true),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn link_channels_are_wired() {
        let LinkEnds {
            to_server,
            mut from_server,
            link,
        } = LinkEnds::new(CancellationToken::new());
        let mut server = link.lock().take().unwrap();

        let ping = JsonRpcMessage::notification("ping", serde_json::json!({}));
        to_server.send(ping.clone()).await.unwrap();
        assert_eq!(server.incoming.recv().await.unwrap(), ping);

        server.outgoing.send(ping.clone()).await.unwrap();
        assert_eq!(from_server.recv().await.unwrap(), ping);
    }
}
