//! JSON-RPC 2.0 envelope handling.
//!
//! The gateway never interprets method semantics. It only needs to tell
//! requests, notifications and responses apart, pair responses with the
//! request ids it is waiting on, and spot the `initialize` handshake.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::TransportError;

/// Protocol version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;
/// Transport-level error (missing session, connection closed).
pub const CONNECTION_ERROR: i64 = -32000;

/// Request identifier. Only integers and strings are accepted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
}

impl RequestId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Shape of a message on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Has `method` and `id`; expects a response.
    Request,
    /// Has `method`, no `id`.
    Notification,
    /// Has `result` or `error`, and an `id`.
    Response,
}

/// A validated JSON-RPC message, kept as raw JSON.
#[derive(Clone, Debug, PartialEq)]
pub struct JsonRpcMessage {
    value: Value,
    kind: MessageKind,
    id: Option<RequestId>,
}

impl JsonRpcMessage {
    /// Validate a raw JSON value as a single message.
    pub fn parse(value: Value) -> Result<Self, TransportError> {
        let Value::Object(obj) = &value else {
            return Err(TransportError::InvalidMessage("expected a JSON object".into()));
        };
        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(TransportError::InvalidMessage("jsonrpc must be \"2.0\"".into()));
        }

        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(RequestId::from_value(raw).ok_or_else(|| {
                TransportError::InvalidMessage("id must be an integer or a string".into())
            })?),
        };

        let kind = if obj.get("method").is_some_and(Value::is_string) {
            if id.is_some() {
                MessageKind::Request
            } else {
                MessageKind::Notification
            }
        } else if obj.contains_key("result") || obj.contains_key("error") {
            MessageKind::Response
        } else {
            return Err(TransportError::InvalidMessage(
                "message has neither method nor result/error".into(),
            ));
        };

        if kind == MessageKind::Response && id.is_none() && !obj.contains_key("error") {
            return Err(TransportError::InvalidMessage("response without id".into()));
        }

        Ok(Self { value, kind, id })
    }

    /// Build a success response.
    pub fn result(id: RequestId, result: Value) -> Self {
        let value = json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result });
        Self {
            value,
            kind: MessageKind::Response,
            id: Some(id),
        }
    }

    /// Build an error response. `id` is `None` when the request could not be identified.
    pub fn error(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        let value = error_body(id.as_ref(), code, &message.into());
        Self {
            value,
            kind: MessageKind::Response,
            id,
        }
    }

    /// Build a notification.
    pub fn notification(method: &str, params: Value) -> Self {
        let value = json!({ "jsonrpc": JSONRPC_VERSION, "method": method, "params": params });
        Self {
            value,
            kind: MessageKind::Notification,
            id: None,
        }
    }

    /// Message shape.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Request/response id, if any.
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        self.value.get("method").and_then(Value::as_str)
    }

    /// Request parameters, if present.
    pub fn params(&self) -> Option<&Value> {
        self.value.get("params")
    }

    /// Whether this is the `initialize` request.
    pub fn is_initialize(&self) -> bool {
        self.kind == MessageKind::Request && self.method() == Some("initialize")
    }

    /// Borrow the raw JSON.
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// Take the raw JSON.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Serialize to a compact JSON string.
    pub fn to_json(&self) -> String {
        self.value.to_string()
    }
}

/// Parse an HTTP body into messages. Returns the messages and whether the
/// body was a batch.
pub fn parse_body(value: Value) -> Result<(Vec<JsonRpcMessage>, bool), TransportError> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(TransportError::InvalidMessage("empty batch".into()));
            }
            let messages = items
                .into_iter()
                .map(JsonRpcMessage::parse)
                .collect::<Result<Vec<_>, _>>()?;
            Ok((messages, true))
        }
        other => Ok((vec![JsonRpcMessage::parse(other)?], false)),
    }
}

/// Whether a raw body is a session-initiating `initialize` request: a single
/// request object whose params carry a `protocolVersion` string.
pub fn is_initialize_request(body: &Value) -> bool {
    body.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION)
        && body.get("method").and_then(Value::as_str) == Some("initialize")
        && body.get("id").and_then(RequestId::from_value).is_some()
        && body
            .get("params")
            .and_then(|p| p.get("protocolVersion"))
            .is_some_and(Value::is_string)
}

/// A bare JSON-RPC error object (`id` becomes `null` when absent).
pub fn error_body(id: Option<&RequestId>, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_body() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "1.0.0" }
            }
        })
    }

    #[test]
    fn classifies_request_notification_response() {
        let req = JsonRpcMessage::parse(json!({"jsonrpc":"2.0","id":7,"method":"ping"})).unwrap();
        assert_eq!(req.kind(), MessageKind::Request);
        assert_eq!(req.id(), Some(&RequestId::Number(7)));

        let note =
            JsonRpcMessage::parse(json!({"jsonrpc":"2.0","method":"notifications/initialized"}))
                .unwrap();
        assert_eq!(note.kind(), MessageKind::Notification);
        assert!(note.id().is_none());

        let resp = JsonRpcMessage::parse(json!({"jsonrpc":"2.0","id":"a","result":{}})).unwrap();
        assert_eq!(resp.kind(), MessageKind::Response);
        assert_eq!(resp.id(), Some(&RequestId::String("a".into())));
    }

    #[test]
    fn rejects_wrong_version_and_shapes() {
        assert!(JsonRpcMessage::parse(json!({"jsonrpc":"1.0","id":1,"method":"x"})).is_err());
        assert!(JsonRpcMessage::parse(json!({"jsonrpc":"2.0","id":1})).is_err());
        assert!(JsonRpcMessage::parse(json!({"jsonrpc":"2.0","id":1.5,"method":"x"})).is_err());
        assert!(JsonRpcMessage::parse(json!([1, 2])).is_err());
        assert!(JsonRpcMessage::parse(json!("text")).is_err());
    }

    #[test]
    fn null_id_error_response_is_valid() {
        let msg = JsonRpcMessage::parse(
            json!({"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"x"}}),
        )
        .unwrap();
        assert_eq!(msg.kind(), MessageKind::Response);
        assert!(msg.id().is_none());
    }

    #[test]
    fn initialize_detection() {
        assert!(is_initialize_request(&init_body()));
        assert!(!is_initialize_request(&json!({"jsonrpc":"2.0","method":"initialize","params":{}})));
        assert!(!is_initialize_request(&json!({"jsonrpc":"2.0","id":1,"method":"initialize","params":{}})));
        assert!(!is_initialize_request(&json!({"method":"not-initialize"})));
        assert!(!is_initialize_request(&json!([init_body()])));
    }

    #[test]
    fn parse_body_batch_and_single() {
        let (single, batch) = parse_body(init_body()).unwrap();
        assert_eq!(single.len(), 1);
        assert!(!batch);
        assert!(single[0].is_initialize());

        let (many, batch) = parse_body(json!([
            {"jsonrpc":"2.0","id":1,"method":"a"},
            {"jsonrpc":"2.0","method":"b"}
        ]))
        .unwrap();
        assert_eq!(many.len(), 2);
        assert!(batch);

        assert!(parse_body(json!([])).is_err());
    }

    #[test]
    fn error_body_uses_null_id() {
        let body = error_body(None, CONNECTION_ERROR, "boom");
        assert_eq!(body["id"], Value::Null);
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["error"]["message"], "boom");
    }

    #[test]
    fn result_roundtrips_id() {
        let msg = JsonRpcMessage::result(RequestId::String("x".into()), json!({"ok": true}));
        assert_eq!(msg.as_value()["id"], "x");
        assert_eq!(msg.as_value()["result"]["ok"], true);
        let reparsed = JsonRpcMessage::parse(msg.into_value()).unwrap();
        assert_eq!(reparsed.kind(), MessageKind::Response);
    }
}
