//! # mcpgate
//!
//! MCP gateway binary: loads settings, starts the session-managing HTTP
//! server in front of the demo RPC server, and waits for a shutdown signal.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mcpgate_logging::{LogConfig, init_subscriber};
use mcpgate_server::{
    McpHttpServer, OsProcess, ServerConfig, SessionConfig, ShutdownCoordinator,
};
use mcpgate_settings::{McpGateSettings, load_settings, load_settings_from_path};

use crate::demo::DemoServer;

/// MCP session gateway.
#[derive(Parser, Debug)]
#[command(name = "mcpgate", about = "MCP session gateway")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.mcpgate/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not route `GET /health`.
    #[arg(long)]
    no_health: bool,
}

impl Cli {
    fn apply(&self, settings: &mut McpGateSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.no_health {
            settings.sessions.enable_health = false;
        }
    }
}

fn server_config(settings: &McpGateSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        server_signature: settings.server.server_signature.clone(),
        cors_allow_any_origin: settings.server.cors_allow_any_origin,
    }
}

fn session_config(settings: &McpGateSettings) -> SessionConfig {
    let s = &settings.sessions;
    SessionConfig {
        streamable_ttl: Duration::from_millis(s.streamable_ttl_ms),
        legacy_sse_ttl: Duration::from_millis(s.legacy_sse_ttl_ms),
        legacy_keep_alive: Duration::from_millis(s.legacy_keep_alive_ms),
        enable_health: s.enable_health,
        reaper_interval: Duration::from_millis(s.reaper_interval_ms),
        session_close_timeout: Duration::from_millis(s.session_close_timeout_ms),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;
    args.apply(&mut settings);

    init_subscriber(&LogConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.json,
    })
    .context("Failed to initialize logging")?;

    let server = McpHttpServer::new(
        server_config(&settings),
        session_config(&settings),
        Arc::new(DemoServer),
    );
    let handle = Arc::new(server.listen().await.context("Failed to bind server")?);
    tracing::info!(
        health = settings.sessions.enable_health,
        "mcpgate listening on http://{}",
        handle.local_addr()
    );

    let coordinator = ShutdownCoordinator::new(
        server.manager().clone(),
        handle,
        Arc::new(OsProcess),
        Duration::from_millis(settings.server.shutdown_timeout_ms),
    );
    let signals = coordinator
        .install()
        .context("Failed to install signal handlers")?;

    // The coordinator exits the process; this only returns if signal
    // delivery itself stops.
    signals.await.context("Signal task failed")?;
    let _ = coordinator.teardown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["mcpgate"]);
        let mut settings = McpGateSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 3001);
        assert!(settings.sessions.enable_health);
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from(["mcpgate", "--host", "127.0.0.1", "--port", "0", "--no-health"]);
        let mut settings = McpGateSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert!(!settings.sessions.enable_health);
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["mcpgate", "--config", "/tmp/gate.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/gate.json")));
    }

    #[test]
    fn session_config_from_settings() {
        let settings = McpGateSettings::default();
        let cfg = session_config(&settings);
        assert_eq!(cfg.streamable_ttl, Duration::from_secs(15 * 60));
        assert_eq!(cfg.legacy_sse_ttl, Duration::from_secs(10 * 60));
        assert_eq!(cfg.legacy_keep_alive, Duration::from_secs(15));
        assert_eq!(cfg.reaper_interval, Duration::from_secs(10));
        assert_eq!(cfg.session_close_timeout, Duration::from_secs(2));
    }

    #[test]
    fn server_config_from_settings() {
        let cfg = server_config(&McpGateSettings::default());
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.server_signature, "mcpgate");
        assert!(cfg.cors_allow_any_origin);
    }
}
