//! Test doubles shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::errors::ConnectError;
use crate::jsonrpc::{JsonRpcMessage, MessageKind};
use crate::transport::{McpServer, McpTransport};

pub(crate) fn init_body() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test", "version": "1.0.0" }
        }
    }))
    .unwrap()
}

/// Records connects and messages; answers requests with `{"method": <name>}`.
#[derive(Default)]
pub(crate) struct MockServer {
    connects: AtomicUsize,
    fail: AtomicBool,
    received: Arc<Mutex<Vec<JsonRpcMessage>>>,
}

impl MockServer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing() -> Arc<Self> {
        let server = Self::default();
        server.fail.store(true, Ordering::SeqCst);
        Arc::new(server)
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn received(&self) -> Vec<JsonRpcMessage> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl McpServer for MockServer {
    async fn connect(&self, transport: Arc<dyn McpTransport>) -> Result<(), ConnectError> {
        let _ = self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectError::Refused("mock refused".into()));
        }

        let mut link = transport.take_link()?;
        let received = Arc::clone(&self.received);
        drop(tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    () = link.closed.cancelled() => break,
                    message = link.incoming.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                received.lock().push(message.clone());
                if let (MessageKind::Request, Some(id)) = (message.kind(), message.id()) {
                    let reply = JsonRpcMessage::result(id.clone(), json!({ "method": message.method() }));
                    if link.outgoing.send(reply).await.is_err() {
                        break;
                    }
                }
            }
        }));
        Ok(())
    }
}
