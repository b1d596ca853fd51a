//! Per-family session registries.
//!
//! One registry per transport family maps a session id to its transport and
//! last-activity time. Every mutation is a single `DashMap` operation, and no
//! shard lock is held across an `.await`. Removal happens only through the
//! transport's close callback, so the reaper, explicit teardown and shutdown
//! all share one removal path.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::transport::TransportKind;

/// A live session: an id bound to a transport handle.
pub struct Session<T: ?Sized> {
    id: String,
    transport: Arc<T>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl<T: ?Sized> Session<T> {
    fn new(id: String, transport: Arc<T>) -> Self {
        let now = Instant::now();
        Self {
            id,
            transport,
            created_at: now,
            last_activity: Mutex::new(now),
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Transport handle.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// When the session was registered.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Last time a request referenced this session.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Record activity now.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Idle time as of `now`.
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }
}

/// In-memory map from session id to [`Session`] for one transport family.
pub struct SessionRegistry<T: ?Sized> {
    kind: TransportKind,
    sessions: DashMap<String, Arc<Session<T>>>,
}

impl<T: ?Sized> SessionRegistry<T> {
    /// Create an empty registry for `kind`.
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            sessions: DashMap::new(),
        }
    }

    /// Transport family this registry serves.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Register a session. An existing entry under the same id is replaced.
    pub fn insert(&self, id: impl Into<String>, transport: Arc<T>) -> Arc<Session<T>> {
        let id = id.into();
        let session = Arc::new(Session::new(id.clone(), transport));
        let replaced = self.sessions.insert(id, session.clone());
        if replaced.is_none() {
            metrics::counter!("mcp_sessions_created_total", "transport" => self.kind.as_str())
                .increment(1);
            metrics::gauge!("mcp_sessions_active", "transport" => self.kind.as_str())
                .increment(1.0);
        }
        session
    }

    /// Look up a session without touching it.
    pub fn get(&self, id: &str) -> Option<Arc<Session<T>>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Look up a session and record activity on it.
    pub fn touch(&self, id: &str) -> Option<Arc<Session<T>>> {
        let session = self.get(id)?;
        session.touch();
        Some(session)
    }

    /// Remove a session. Returns `None` if it was already gone.
    pub fn remove(&self, id: &str) -> Option<Arc<Session<T>>> {
        let (_, session) = self.sessions.remove(id)?;
        metrics::gauge!("mcp_sessions_active", "transport" => self.kind.as_str()).decrement(1.0);
        Some(session)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Copy of all live sessions. Safe to iterate while entries are removed.
    pub fn snapshot(&self) -> Vec<Arc<Session<T>>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Sessions idle for longer than `ttl` as of `now`.
    pub fn expired(&self, now: Instant, ttl: Duration) -> Vec<Arc<Session<T>>> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.idle(now) > ttl)
            .collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
