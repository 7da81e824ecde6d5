//! Session management
//!
//! Holds every active persona session. Sessions share the persona store
//! read-only and are otherwise independent; each sits behind its own mutex so
//! turns within a session are serialised while sessions proceed in parallel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use persona::PersonaStore;

use crate::config::GuardConfig;
use crate::report::{GovernanceReporter, Report};
use crate::regenerate::Regeneration;
use crate::session::{ClosureReason, PersonaSession};
use crate::trajectory::TrajectoryRecorder;
use crate::types::{GuardError, Result, Turn, Verdict};

/// Shared handle to one session.
pub type SessionHandle = Arc<Mutex<PersonaSession>>;

/// Registry of persona sessions.
pub struct SessionManager {
    store: Arc<PersonaStore>,
    config: GuardConfig,
    sessions: DashMap<String, SessionHandle>,
    reporter: GovernanceReporter,
    // Serialises the capacity check with the insert in `open`.
    open_gate: Mutex<()>,
}

impl SessionManager {
    /// Create a manager over a persona store.
    pub fn new(store: Arc<PersonaStore>, config: GuardConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            sessions: DashMap::new(),
            reporter: GovernanceReporter::new(),
            open_gate: Mutex::new(()),
        })
    }

    /// Open a session bound to the latest sealed version of a persona.
    ///
    /// `session.max_sessions` caps open sessions; closed sessions retained
    /// for audit do not count.
    pub async fn open(&self, persona_id: &str) -> Result<String> {
        let spec = self.store.sealed(persona_id).await?;

        let _gate = self.open_gate.lock().await;
        let max = self.config.session.max_sessions;
        if self.open_count().await >= max {
            return Err(GuardError::SessionLimit(max));
        }

        let session = PersonaSession::new(None, spec, &self.config)?;
        let id = session.id().to_string();
        self.sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        Ok(id)
    }

    /// Look up a session handle.
    pub fn get(&self, session_id: &str) -> Result<SessionHandle> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| GuardError::SessionNotFound(session_id.to_string()))
    }

    /// Submit a turn to a session.
    pub async fn submit(&self, session_id: &str, turn: Turn) -> Result<Verdict> {
        let handle = self.get(session_id)?;
        let mut session = handle.lock().await;
        session.submit(turn).await
    }

    /// Run a candidate response through a session's regeneration guard.
    pub async fn guard(&self, session_id: &str, candidate: &str) -> Result<Regeneration> {
        let handle = self.get(session_id)?;
        let mut session = handle.lock().await;
        Ok(session.guard(candidate))
    }

    /// Close a session. Returns false if it was already closed.
    pub async fn close(&self, session_id: &str, reason: ClosureReason) -> Result<bool> {
        let handle = self.get(session_id)?;
        let mut session = handle.lock().await;
        Ok(session.close(reason))
    }

    /// Governance report for a session.
    pub async fn report(&self, session_id: &str) -> Result<Report> {
        let handle = self.get(session_id)?;
        let snapshot = handle.lock().await.snapshot();
        Ok(self.reporter.report(&snapshot))
    }

    /// Handle to a session's turn log.
    pub async fn recorder(&self, session_id: &str) -> Result<TrajectoryRecorder> {
        let handle = self.get(session_id)?;
        let session = handle.lock().await;
        Ok(session.recorder())
    }

    /// Remove a session from the registry, returning its final report.
    pub async fn remove(&self, session_id: &str) -> Result<Report> {
        let (_, handle) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| GuardError::SessionNotFound(session_id.to_string()))?;
        let mut session = handle.lock().await;
        session.close(ClosureReason::Operator);
        Ok(self.reporter.report(&session.snapshot()))
    }

    /// Close sessions idle as of `now`. Closed sessions are dropped from the
    /// registry unless `general.retain_closed_sessions` is set.
    ///
    /// Returns the ids of the sessions closed.
    pub async fn reap_idle(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = self.config.session.idle_timeout();
        let handles: Vec<(String, SessionHandle)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut reaped = Vec::new();
        for (id, handle) in handles {
            let mut session = handle.lock().await;
            if session.is_idle(now, timeout) {
                session.close(ClosureReason::Idle);
                reaped.push(id.clone());
            }
            if !session.is_open() && !self.config.general.retain_closed_sessions {
                drop(session);
                self.sessions.remove(&id);
            }
        }

        if !reaped.is_empty() {
            info!(count = reaped.len(), "Reaped idle persona sessions");
        }
        reaped
    }

    /// Session counts.
    pub async fn stats(&self) -> SessionStats {
        let total = self.sessions.len();
        let open = self.open_count().await;
        SessionStats {
            total,
            open,
            closed: total.saturating_sub(open),
        }
    }

    async fn open_count(&self) -> usize {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        let mut open = 0;
        for handle in &handles {
            if handle.lock().await.is_open() {
                open += 1;
            }
        }
        open
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Active configuration.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }
}

/// Session registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub open: usize,
    pub closed: usize,
}

/// Spawn a task that reaps idle sessions every `session.reap_interval_secs`.
pub fn spawn_reaper_task(manager: Arc<SessionManager>) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(manager.config.session.reap_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let reaped = manager.reap_idle(Utc::now()).await;
            debug!(reaped = reaped.len(), "Idle session sweep");
        }
    })
}
