//! Small built-in RPC server so the binary answers something useful.
//!
//! Tools: `add`, `subtract`. Resource template: `greeting://{name}`.

use std::sync::Arc;

use async_trait::async_trait;
use mcpgate_server::jsonrpc::{INVALID_PARAMS, METHOD_NOT_FOUND};
use mcpgate_server::{ConnectError, JsonRpcMessage, McpServer, McpTransport, MessageKind};
use serde_json::{Value, json};
use tracing::debug;

const PROTOCOL_VERSION: &str = "2024-11-05";
const GREETING_SCHEME: &str = "greeting://";

type RpcResult = Result<Value, (i64, String)>;

/// Demo RPC server. Every connected transport gets its own dispatch loop.
#[derive(Debug, Default)]
pub struct DemoServer;

#[async_trait]
impl McpServer for DemoServer {
    async fn connect(&self, transport: Arc<dyn McpTransport>) -> Result<(), ConnectError> {
        let mut link = transport.take_link()?;
        let kind = transport.kind();
        drop(tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    () = link.closed.cancelled() => break,
                    message = link.incoming.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                let Some(reply) = respond(&message) else {
                    continue;
                };
                if link.outgoing.send(reply).await.is_err() {
                    break;
                }
            }
            debug!(transport = %kind, "demo dispatch loop stopped");
        }));
        Ok(())
    }
}

/// Reply for one inbound message. Notifications and responses get none.
pub fn respond(message: &JsonRpcMessage) -> Option<JsonRpcMessage> {
    if message.kind() != MessageKind::Request {
        return None;
    }
    let id = message.id()?.clone();
    let method = message.method().unwrap_or_default();
    let params = message.params().cloned().unwrap_or(Value::Null);

    Some(match dispatch(method, &params) {
        Ok(result) => JsonRpcMessage::result(id, result),
        Err((code, msg)) => JsonRpcMessage::error(Some(id), code, msg),
    })
}

fn dispatch(method: &str, params: &Value) -> RpcResult {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {}, "resources": {} },
            "serverInfo": { "name": "mcpgate-demo", "version": env!("CARGO_PKG_VERSION") }
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": [
            arithmetic_tool("add", "Add two numbers"),
            arithmetic_tool("subtract", "Subtract b from a"),
        ]})),
        "tools/call" => call_tool(params),
        "resources/templates/list" => Ok(json!({ "resourceTemplates": [{
            "uriTemplate": "greeting://{name}",
            "name": "greeting",
            "description": "Personalized greeting",
            "mimeType": "text/plain"
        }]})),
        "resources/read" => read_resource(params),
        other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
    }
}

fn arithmetic_tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": { "a": { "type": "number" }, "b": { "type": "number" } },
            "required": ["a", "b"]
        }
    })
}

fn call_tool(params: &Value) -> RpcResult {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let args = params.get("arguments").unwrap_or(&Value::Null);
    let operand = |key: &str| {
        args.get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| (INVALID_PARAMS, format!("argument '{key}' must be a number")))
    };

    let value = match name {
        "add" => operand("a")? + operand("b")?,
        "subtract" => operand("a")? - operand("b")?,
        other => return Err((INVALID_PARAMS, format!("Unknown tool: {other}"))),
    };
    Ok(json!({ "content": [{ "type": "text", "text": value.to_string() }] }))
}

fn read_resource(params: &Value) -> RpcResult {
    let uri = params.get("uri").and_then(Value::as_str).unwrap_or_default();
    let name = uri
        .strip_prefix(GREETING_SCHEME)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| (INVALID_PARAMS, format!("Unknown resource: {uri}")))?;
    Ok(json!({ "contents": [{
        "uri": uri,
        "mimeType": "text/plain",
        "text": format!("Hello, {name}!")
    }]}))
}
