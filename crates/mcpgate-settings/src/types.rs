//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a partial settings file only needs to name the values it changes.

use serde::{Deserialize, Serialize};

/// Root settings type for the gateway.
///
/// ```json
/// {
///   "server": { "port": 3001 },
///   "sessions": { "legacyKeepAliveMs": 15000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpGateSettings {
    /// HTTP listener and process lifecycle settings.
    pub server: ServerSettings,
    /// Session lifetimes, keep-alive cadence and optional routes.
    pub sessions: SessionSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Upper bound on the whole shutdown teardown before the process
    /// exits with a failure status.
    pub shutdown_timeout_ms: u64,
    /// Value stamped into the `X-Server-Signature` response header.
    pub server_signature: String,
    /// Reflect any request origin in CORS responses.
    pub cors_allow_any_origin: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            shutdown_timeout_ms: 5_000,
            server_signature: "mcpgate".to_string(),
            cors_allow_any_origin: true,
        }
    }
}

/// Session lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Idle time after which a streamable HTTP session is reaped.
    pub streamable_ttl_ms: u64,
    /// Idle time after which a legacy SSE session is reaped.
    pub legacy_sse_ttl_ms: u64,
    /// Interval between keep-alive frames on legacy SSE streams.
    pub legacy_keep_alive_ms: u64,
    /// Whether `GET /health` is routed.
    pub enable_health: bool,
    /// How often the reaper scans both registries.
    pub reaper_interval_ms: u64,
    /// Per-session bound on `close()` during shutdown.
    pub session_close_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            streamable_ttl_ms: 15 * 60 * 1000,
            legacy_sse_ttl_ms: 10 * 60 * 1000,
            legacy_keep_alive_ms: 15_000,
            enable_health: true,
            reaper_interval_ms: 10_000,
            session_close_timeout_ms: 2_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
