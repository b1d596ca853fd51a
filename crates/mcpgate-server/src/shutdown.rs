//! Process-signal shutdown coordination.
//!
//! Every trigger runs the same teardown (drain sessions, then close the HTTP
//! server) behind a one-shot guard, so signals that race each other share a
//! single teardown. What happens afterwards depends on the trigger: interrupt
//! and terminate exit the process, restart re-raises the signal so an outer
//! supervisor still sees it.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::manager::SessionManager;
use crate::server::ServerHandle;

/// Default bound on the whole teardown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// What asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGINT / ctrl-c.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGUSR2, sent by development restart supervisors.
    Restart,
}

impl ShutdownTrigger {
    /// Signal name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Restart => "SIGUSR2",
        }
    }
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-level side effects of shutdown.
pub trait ProcessControl: Send + Sync {
    /// Terminate the process with `code`.
    fn exit(&self, code: i32);

    /// Restore the default disposition for `trigger`'s signal and raise it
    /// against the current process.
    fn reraise(&self, trigger: ShutdownTrigger) -> io::Result<()>;
}

/// The real process.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcess;

impl ProcessControl for OsProcess {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }

    #[cfg(unix)]
    fn reraise(&self, trigger: ShutdownTrigger) -> io::Result<()> {
        use nix::sys::signal::{Signal, raise};

        let sig = match trigger {
            ShutdownTrigger::Interrupt => Signal::SIGINT,
            ShutdownTrigger::Terminate => Signal::SIGTERM,
            ShutdownTrigger::Restart => Signal::SIGUSR2,
        };
        restore_default(sig)?;
        raise(sig).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn reraise(&self, trigger: ShutdownTrigger) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot re-raise {trigger} on this platform"),
        ))
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn restore_default(sig: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::sys::signal::{SigHandler, signal};

    // SAFETY: tokio keeps its own handler installed for signals it has
    // registered, and neither tokio nor nix exposes a safe way to restore
    // the default disposition; `sigaction` is the only route. SIG_DFL runs
    // no Rust code in signal context, and nothing else in this process
    // installs handlers concurrently at teardown.
    let _previous = unsafe { signal(sig, SigHandler::SigDfl) }.map_err(io::Error::from)?;
    Ok(())
}

/// Runs teardown once and then performs the trigger's process action.
pub struct ShutdownCoordinator {
    manager: Arc<SessionManager>,
    server: Arc<ServerHandle>,
    process: Arc<dyn ProcessControl>,
    timeout: Duration,
    teardown: OnceCell<bool>,
}

impl ShutdownCoordinator {
    /// Create a coordinator for one running server.
    pub fn new(
        manager: Arc<SessionManager>,
        server: Arc<ServerHandle>,
        process: Arc<dyn ProcessControl>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            server,
            process,
            timeout,
            teardown: OnceCell::new(),
        })
    }

    /// Whether teardown has completed.
    pub fn is_torn_down(&self) -> bool {
        self.teardown.initialized()
    }

    /// Close every session, then the HTTP server. Returns whether the
    /// server closed cleanly. Concurrent and repeated calls share the first
    /// run.
    pub async fn teardown(&self) -> bool {
        *self.teardown.get_or_init(|| self.run_teardown()).await
    }

    async fn run_teardown(&self) -> bool {
        let report = self.manager.close_all_sessions().await;
        if report.timed_out > 0 {
            warn!(timed_out = report.timed_out, "some sessions did not close in time");
        }
        match self.server.close().await {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "http server failed while closing");
                false
            }
        }
    }

    /// Tear down and then act on `trigger`.
    pub async fn handle(&self, trigger: ShutdownTrigger) {
        info!(signal = %trigger, "shutdown requested");

        let Ok(server_ok) = tokio::time::timeout(self.timeout, self.teardown()).await else {
            error!(
                signal = %trigger,
                timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                "shutdown timed out, forcing exit"
            );
            self.process.exit(1);
            return;
        };

        match trigger {
            ShutdownTrigger::Interrupt | ShutdownTrigger::Terminate => {
                info!(signal = %trigger, "shutdown complete");
                self.process.exit(if server_ok { 0 } else { 1 });
            }
            ShutdownTrigger::Restart => {
                info!(signal = %trigger, "shutdown complete, re-raising for supervisor");
                if let Err(err) = self.process.reraise(trigger) {
                    error!(signal = %trigger, error = %err, "failed to re-raise signal");
                    self.process.exit(1);
                }
            }
        }
    }

    /// Register the signal handlers and dispatch each delivery to
    /// [`handle`](Self::handle). Registration happens before this returns.
    pub fn install(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let mut signals = Signals::register()?;
        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(trigger) = signals.next().await {
                let coordinator = Arc::clone(&coordinator);
                drop(tokio::spawn(async move { coordinator.handle(trigger).await }));
            }
        }))
    }
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    restart: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            restart: signal(SignalKind::user_defined2())?,
        })
    }

    async fn next(&mut self) -> Option<ShutdownTrigger> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|()| ShutdownTrigger::Interrupt),
            received = self.terminate.recv() => received.map(|()| ShutdownTrigger::Terminate),
            received = self.restart.recv() => received.map(|()| ShutdownTrigger::Restart),
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    #[allow(clippy::unnecessary_wraps)]
    fn register() -> io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Option<ShutdownTrigger> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|()| ShutdownTrigger::Interrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, SessionConfig};
    use crate::server::McpHttpServer;
    use crate::testing::{MockServer, init_body};
    use crate::transport::McpTransport;
    use axum::body::Body;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Action {
        Exit(i32),
        Reraise(ShutdownTrigger),
    }

    #[derive(Default)]
    struct RecordingProcess {
        actions: Mutex<Vec<Action>>,
        fail_reraise: bool,
    }

    impl RecordingProcess {
        fn actions(&self) -> Vec<Action> {
            self.actions.lock().clone()
        }
    }

    impl ProcessControl for RecordingProcess {
        fn exit(&self, code: i32) {
            self.actions.lock().push(Action::Exit(code));
        }

        fn reraise(&self, trigger: ShutdownTrigger) -> io::Result<()> {
            self.actions.lock().push(Action::Reraise(trigger));
            if self.fail_reraise {
                Err(io::Error::other("no signals here"))
            } else {
                Ok(())
            }
        }
    }

    struct Fixture {
        server: McpHttpServer,
        coordinator: Arc<ShutdownCoordinator>,
        process: Arc<RecordingProcess>,
    }

    async fn fixture(process: RecordingProcess, timeout: Duration) -> Fixture {
        let server = McpHttpServer::new(
            ServerConfig::default(),
            SessionConfig::default(),
            MockServer::new(),
        );
        let handle = Arc::new(server.listen().await.unwrap());
        let process = Arc::new(process);
        let coordinator = ShutdownCoordinator::new(
            server.manager().clone(),
            handle,
            process.clone(),
            timeout,
        );
        Fixture {
            server,
            coordinator,
            process,
        }
    }

    /// Register one streamable and one legacy session. The returned body
    /// keeps the legacy stream's client attached.
    async fn open_sessions(manager: &SessionManager) -> (Vec<Arc<dyn McpTransport>>, Body) {
        let streamable = manager.streamable_transport();
        manager.server().connect(streamable.clone()).await.unwrap();
        let _ = streamable.handle_post(&init_body()).await;

        let (legacy, body) = manager.legacy_transport();
        manager.server().connect(legacy.clone()).await.unwrap();
        manager.register_legacy(&legacy);

        let sessions = vec![
            streamable as Arc<dyn McpTransport>,
            legacy as Arc<dyn McpTransport>,
        ];
        (sessions, body)
    }

    #[tokio::test]
    async fn interrupt_closes_sessions_and_exits_zero() {
        let fx = fixture(RecordingProcess::default(), DEFAULT_SHUTDOWN_TIMEOUT).await;
        let (sessions, _body) = open_sessions(fx.server.manager()).await;
        assert_eq!(fx.server.manager().legacy().len(), 1);

        fx.coordinator.handle(ShutdownTrigger::Interrupt).await;

        assert!(sessions.iter().all(|t| t.is_closed()));
        assert!(fx.server.manager().streamable().is_empty());
        assert!(fx.server.manager().legacy().is_empty());
        assert_eq!(fx.process.actions(), vec![Action::Exit(0)]);
        assert!(fx.coordinator.is_torn_down());
    }

    #[tokio::test]
    async fn teardown_closes_sessions_opened_after_an_earlier_drain() {
        let fx = fixture(RecordingProcess::default(), DEFAULT_SHUTDOWN_TIMEOUT).await;
        let _ = fx.server.manager().close_all_sessions().await;
        let (sessions, _body) = open_sessions(fx.server.manager()).await;

        fx.coordinator.handle(ShutdownTrigger::Interrupt).await;

        assert!(sessions.iter().all(|t| t.is_closed()));
        assert!(fx.server.manager().streamable().is_empty());
        assert!(fx.server.manager().legacy().is_empty());
        assert_eq!(fx.process.actions(), vec![Action::Exit(0)]);
    }

    #[tokio::test]
    async fn terminate_exits_zero() {
        let fx = fixture(RecordingProcess::default(), DEFAULT_SHUTDOWN_TIMEOUT).await;
        fx.coordinator.handle(ShutdownTrigger::Terminate).await;
        assert_eq!(fx.process.actions(), vec![Action::Exit(0)]);
    }

    #[tokio::test]
    async fn restart_reraises_without_exit() {
        let fx = fixture(RecordingProcess::default(), DEFAULT_SHUTDOWN_TIMEOUT).await;
        let (sessions, _body) = open_sessions(fx.server.manager()).await;

        fx.coordinator.handle(ShutdownTrigger::Restart).await;

        assert!(sessions.iter().all(|t| t.is_closed()));
        assert_eq!(
            fx.process.actions(),
            vec![Action::Reraise(ShutdownTrigger::Restart)]
        );
    }

    #[tokio::test]
    async fn failed_reraise_exits_one() {
        let process = RecordingProcess {
            fail_reraise: true,
            ..RecordingProcess::default()
        };
        let fx = fixture(process, DEFAULT_SHUTDOWN_TIMEOUT).await;
        fx.coordinator.handle(ShutdownTrigger::Restart).await;
        assert_eq!(
            fx.process.actions(),
            vec![Action::Reraise(ShutdownTrigger::Restart), Action::Exit(1)]
        );
    }

    #[tokio::test]
    async fn concurrent_triggers_share_one_teardown() {
        let fx = fixture(RecordingProcess::default(), DEFAULT_SHUTDOWN_TIMEOUT).await;
        let (_sessions, _body) = open_sessions(fx.server.manager()).await;

        let _ = tokio::join!(
            fx.coordinator.handle(ShutdownTrigger::Interrupt),
            fx.coordinator.handle(ShutdownTrigger::Restart)
        );

        let actions = fx.process.actions();
        assert_eq!(actions.len(), 2);
        assert!(actions.contains(&Action::Exit(0)));
        assert!(actions.contains(&Action::Reraise(ShutdownTrigger::Restart)));
        assert!(fx.coordinator.teardown().await);
    }

    #[tokio::test]
    async fn stuck_teardown_forces_exit_one() {
        let fx = fixture(RecordingProcess::default(), Duration::from_millis(100)).await;
        // A tracked task that never finishes keeps the server close pending.
        let _stuck = fx.server.manager().tasks().spawn(std::future::pending::<()>());

        fx.coordinator.handle(ShutdownTrigger::Interrupt).await;
        assert_eq!(fx.process.actions(), vec![Action::Exit(1)]);
    }

    #[test]
    fn trigger_names() {
        assert_eq!(ShutdownTrigger::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownTrigger::Terminate.as_str(), "SIGTERM");
        assert_eq!(ShutdownTrigger::Restart.as_str(), "SIGUSR2");
    }
}
