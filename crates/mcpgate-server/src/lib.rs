//! # mcpgate-server
//!
//! Session-multiplexed HTTP transport manager for MCP servers.
//!
//! - Streamable transport: `POST`/`GET`/`DELETE /mcp`, keyed by the
//!   `mcp-session-id` header
//! - Legacy push transport: `GET /sse` plus `POST /messages?sessionId=`
//! - Session registries with idle-TTL reaping and SSE keep-alive heartbeats
//! - `/ping` and optional `/health`
//! - Idempotent teardown on SIGINT/SIGTERM/SIGUSR2 via [`ShutdownCoordinator`]

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod heartbeat;
pub mod jsonrpc;
pub mod manager;
pub mod reaper;
pub mod registry;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{ServerConfig, SessionConfig};
pub use errors::{ApiError, ConnectError, ServerError, TransportError};
pub use jsonrpc::{JsonRpcMessage, MessageKind, RequestId};
pub use manager::{DrainReport, SessionManager};
pub use server::{McpHttpServer, ServerHandle};
pub use shutdown::{OsProcess, ProcessControl, ShutdownCoordinator, ShutdownTrigger};
pub use transport::{McpServer, McpTransport, ServerLink, TransportKind};
