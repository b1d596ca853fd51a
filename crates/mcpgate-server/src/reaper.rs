//! Idle-session reaper.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::manager::{SessionManager, close_session};
use crate::registry::SessionRegistry;

/// Sessions closed by one reaper pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    /// Streamable sessions reaped.
    pub streamable: usize,
    /// Legacy SSE sessions reaped.
    pub legacy_sse: usize,
}

impl ReapReport {
    /// Total sessions reaped.
    pub fn total(self) -> usize {
        self.streamable + self.legacy_sse
    }
}

/// Scan both registries every `interval` until `cancel` fires.
pub async fn run_reaper(manager: Arc<SessionManager>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(interval_ms = ms(interval), "reaper started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let now = Instant::now();
                log_census(&manager, now);
                let report = reap_expired(&manager, now).await;
                if report.total() > 0 {
                    info!(
                        streamable = report.streamable,
                        legacy_sse = report.legacy_sse,
                        "reaped idle sessions"
                    );
                }
            }
        }
    }
    debug!("reaper stopped");
}

/// Close every session idle for longer than its family's TTL as of `now`.
/// Legacy streams are also destroyed, since a push channel has no close
/// handshake of its own.
pub async fn reap_expired(manager: &SessionManager, now: Instant) -> ReapReport {
    let config = manager.config();
    let timeout = config.session_close_timeout;
    let mut report = ReapReport::default();

    for session in manager.streamable().expired(now, config.streamable_ttl) {
        debug!(session_id = %session.id(), idle_ms = ms(session.idle(now)), "reaping streamable session");
        let _ = close_session(&session, timeout).await;
        report.streamable += 1;
    }

    for session in manager.legacy().expired(now, config.legacy_sse_ttl) {
        debug!(session_id = %session.id(), idle_ms = ms(session.idle(now)), "reaping legacy sse session");
        let _ = close_session(&session, timeout).await;
        session.transport().sink().destroy();
        report.legacy_sse += 1;
    }

    if report.streamable > 0 {
        metrics::counter!("mcp_sessions_reaped_total", "transport" => "streamable")
            .increment(report.streamable as u64);
    }
    if report.legacy_sse > 0 {
        metrics::counter!("mcp_sessions_reaped_total", "transport" => "legacy_sse")
            .increment(report.legacy_sse as u64);
    }
    report
}

fn log_census(manager: &SessionManager, now: Instant) {
    debug!(
        streamable = manager.streamable().len(),
        legacy_sse = manager.legacy().len(),
        "session census"
    );
    census_entries(manager.streamable(), now);
    census_entries(manager.legacy(), now);
}

fn census_entries<T>(registry: &SessionRegistry<T>, now: Instant) {
    for session in registry.snapshot() {
        debug!(
            transport = %registry.kind(),
            session_id = %session.id(),
            idle_ms = ms(session.idle(now)),
            "live session"
        );
    }
}

fn ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::testing::{MockServer, init_body};
    use crate::transport::McpTransport;

    fn config() -> SessionConfig {
        SessionConfig {
            streamable_ttl: Duration::from_secs(60),
            legacy_sse_ttl: Duration::from_secs(30),
            legacy_keep_alive: Duration::from_secs(5),
            reaper_interval: Duration::from_secs(10),
            ..SessionConfig::default()
        }
    }

    async fn streamable_session(manager: &SessionManager) -> String {
        let transport = manager.streamable_transport();
        manager.server().connect(transport.clone()).await.unwrap();
        let _ = transport.handle_post(&init_body()).await;
        transport.session_id().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_sessions_survive() {
        let manager = SessionManager::new(config(), MockServer::new());
        let id = streamable_session(&manager).await;

        let report = reap_expired(&manager, Instant::now()).await;
        assert_eq!(report.total(), 0);
        assert!(manager.streamable().contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_streamable_session_is_closed_once() {
        let manager = SessionManager::new(config(), MockServer::new());
        let id = streamable_session(&manager).await;
        let transport = manager.streamable().get(&id).unwrap().transport().clone();

        time::advance(Duration::from_secs(61)).await;
        let report = reap_expired(&manager, Instant::now()).await;
        assert_eq!(report.streamable, 1);
        assert!(!manager.streamable().contains(&id));
        assert!(transport.is_closed());

        // Already gone: a second pass finds nothing.
        assert_eq!(reap_expired(&manager, Instant::now()).await.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn touched_session_is_kept() {
        let manager = SessionManager::new(config(), MockServer::new());
        let id = streamable_session(&manager).await;

        time::advance(Duration::from_secs(50)).await;
        let _ = manager.streamable().touch(&id);
        time::advance(Duration::from_secs(50)).await;

        assert_eq!(reap_expired(&manager, Instant::now()).await.total(), 0);
        assert!(manager.streamable().contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_legacy_session_is_closed_and_destroyed() {
        let manager = SessionManager::new(config(), MockServer::new());
        let (transport, _body) = manager.legacy_transport();
        manager.server().connect(transport.clone()).await.unwrap();
        manager.register_legacy(&transport);

        time::advance(Duration::from_secs(31)).await;
        let report = reap_expired(&manager, Instant::now()).await;
        assert_eq!(report.legacy_sse, 1);
        assert!(manager.legacy().is_empty());
        assert!(transport.is_closed());
        assert!(transport.sink().is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn each_family_uses_its_own_ttl() {
        let manager = SessionManager::new(config(), MockServer::new());
        let id = streamable_session(&manager).await;
        let (legacy, _body) = manager.legacy_transport();
        manager.register_legacy(&legacy);

        // Past the legacy TTL, short of the streamable one.
        time::advance(Duration::from_secs(45)).await;
        let report = reap_expired(&manager, Instant::now()).await;
        assert_eq!(report, ReapReport { streamable: 0, legacy_sse: 1 });
        assert!(manager.streamable().contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn background_reaper_removes_by_next_tick() {
        let manager = SessionManager::new(config(), MockServer::new());
        let id = streamable_session(&manager).await;
        manager.spawn_reaper();

        // TTL 60s, interval 10s: expired at 61s, caught by the 70s tick.
        time::sleep(Duration::from_secs(71)).await;
        assert!(!manager.streamable().contains(&id));

        manager.shutdown().await;
    }
}
