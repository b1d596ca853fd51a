//! Construction-time configuration.

use std::time::Duration;

/// HTTP listener configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Value of the `X-Server-Signature` response header.
    pub server_signature: String,
    /// Allow any origin in CORS responses.
    pub cors_allow_any_origin: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            server_signature: "mcpgate".into(),
            cors_allow_any_origin: true,
        }
    }
}

/// Session lifecycle options. Immutable once the manager is built.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Idle time before a streamable session is reaped.
    pub streamable_ttl: Duration,
    /// Idle time before a legacy SSE session is reaped.
    pub legacy_sse_ttl: Duration,
    /// Keep-alive frame interval on legacy SSE streams.
    pub legacy_keep_alive: Duration,
    /// Route `GET /health`.
    pub enable_health: bool,
    /// Reaper scan interval.
    pub reaper_interval: Duration,
    /// Bound on a single session's `close()` during teardown.
    pub session_close_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            streamable_ttl: Duration::from_secs(15 * 60),
            legacy_sse_ttl: Duration::from_secs(10 * 60),
            legacy_keep_alive: Duration::from_secs(15),
            enable_health: true,
            reaper_interval: Duration::from_secs(10),
            session_close_timeout: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttls() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.streamable_ttl, Duration::from_secs(900));
        assert_eq!(cfg.legacy_sse_ttl, Duration::from_secs(600));
    }

    #[test]
    fn keepalive_and_reaper_finer_than_ttls() {
        let cfg = SessionConfig::default();
        assert!(cfg.legacy_keep_alive < cfg.legacy_sse_ttl);
        assert!(cfg.reaper_interval < cfg.legacy_sse_ttl);
        assert!(cfg.reaper_interval < cfg.streamable_ttl);
    }

    #[test]
    fn health_enabled_by_default() {
        assert!(SessionConfig::default().enable_health);
    }

    #[test]
    fn server_defaults_bind_loopback_ephemeral() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.server_signature, "mcpgate");
    }
}
