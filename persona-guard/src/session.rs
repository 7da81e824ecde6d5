//! Persona session - the per-session evaluation pipeline state.
//!
//! A session owns everything that is order-dependent: the trajectory log, the
//! primitive budget ledger, live engram strengths, the drift detector and the
//! cached coherence score. Turns are evaluated strictly in sequence; the first
//! axiom violation closes the session for good.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use persona::SealedPersonaSpec;

use crate::coherence::CoherenceScore;
use crate::config::{CoherenceConfig, GuardConfig};
use crate::drift::{Baseline, DriftDetector, DriftSignal};
use crate::engram::EngramState;
use crate::evaluator::{BudgetLedger, ConsistencyEvaluator};
use crate::regenerate::{PressureMonitor, Regeneration, Regenerator};
use crate::trajectory::TrajectoryRecorder;
use crate::types::{GuardError, Result, Turn, TurnId, Verdict};

/// Why a session stopped accepting turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClosureReason {
    /// A turn violated an axiom
    IdentityBreach { axiom_id: String, turn: TurnId },
    /// No turn arrived within the idle timeout
    Idle,
    /// Closed by the operator
    Operator,
    /// The turn source went away
    Cancelled,
}

impl ClosureReason {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdentityBreach { .. } => "identity_breach",
            Self::Idle => "idle",
            Self::Operator => "operator",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed {
        reason: ClosureReason,
        closed_at: DateTime<Utc>,
    },
}

impl SessionStatus {
    /// Whether the session accepts turns.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Point-in-time copy of a session's observable state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub persona: Arc<SealedPersonaSpec>,
    pub status: SessionStatus,
    pub opened_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub verdicts: Vec<Verdict>,
    pub drift_signals: Vec<DriftSignal>,
    pub drifting: bool,
    pub coherence: CoherenceScore,
    pub budget_initial: u32,
    pub budget_remaining: i64,
    pub budget_exhausted: bool,
    pub engram_strengths: BTreeMap<String, f64>,
    pub pressure: PressureMonitor,
}

/// One active interaction session bound to a sealed persona.
pub struct PersonaSession {
    id: String,
    spec: Arc<SealedPersonaSpec>,
    coherence_config: CoherenceConfig,
    recorder: TrajectoryRecorder,
    evaluator: ConsistencyEvaluator,
    ledger: BudgetLedger,
    history: Vec<String>,
    verdicts: Vec<Verdict>,
    engrams: EngramState,
    drift: DriftDetector,
    coherence: CoherenceScore,
    regenerator: Regenerator,
    pressure: PressureMonitor,
    status: SessionStatus,
    opened_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl PersonaSession {
    /// Open a session. A random id is assigned when `id` is `None`.
    pub fn new(id: Option<String>, spec: Arc<SealedPersonaSpec>, config: &GuardConfig) -> Result<Self> {
        config.validate()?;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let drift = DriftDetector::new(&config.drift, Baseline::from_spec(&spec))?;
        let now = Utc::now();

        info!(
            session_id = %id,
            persona_id = %spec.id(),
            version = spec.version(),
            budget = spec.primitive_budget(),
            "Opened persona session"
        );

        Ok(Self {
            ledger: BudgetLedger::for_spec(&spec),
            engrams: EngramState::from_spec(&spec),
            coherence_config: config.coherence.clone(),
            recorder: TrajectoryRecorder::new(),
            evaluator: ConsistencyEvaluator::new(),
            history: Vec::new(),
            verdicts: Vec::new(),
            drift,
            coherence: CoherenceScore::perfect(),
            regenerator: Regenerator::from_config(&config.regeneration),
            pressure: PressureMonitor::new(&config.regeneration),
            status: SessionStatus::Open,
            opened_at: now,
            last_activity: now,
            spec,
            id,
        })
    }

    /// Record and evaluate the next turn.
    ///
    /// An axiom violation closes the session and is returned as
    /// [`GuardError::IdentityBreach`] carrying the verdict.
    pub async fn submit(&mut self, turn: Turn) -> Result<Verdict> {
        if !self.status.is_open() {
            return Err(GuardError::SessionClosed(self.id.clone()));
        }

        let sequence = self.recorder.append(turn.clone()).await?;
        let verdict = self.evaluator.evaluate(&self.spec, &turn, &self.history, &mut self.ledger);
        self.recorder.attach_verdict(sequence, verdict.clone()).await;

        self.history.push(turn.response);
        self.engrams.observe(&verdict);
        self.drift.update(&verdict);
        self.verdicts.push(verdict.clone());
        self.coherence = CoherenceScore::from_verdicts(&self.verdicts, &self.spec, &self.coherence_config);
        self.last_activity = Utc::now();

        if let Some(breach) = verdict.identity_breach() {
            let axiom_id = breach.constraint.id().to_string();
            error!(
                session_id = %self.id,
                persona_id = %self.spec.id(),
                axiom = %axiom_id,
                turn = sequence,
                "Identity breach, closing session"
            );
            self.close(ClosureReason::IdentityBreach {
                axiom_id: axiom_id.clone(),
                turn: sequence,
            });
            return Err(GuardError::IdentityBreach {
                session_id: self.id.clone(),
                axiom_id,
                turn: sequence,
                verdict: Box::new(verdict),
            });
        }

        Ok(verdict)
    }

    /// Run a candidate response through the regeneration guard without
    /// committing it. The session's pressure counters are updated.
    pub fn guard(&mut self, candidate: &str) -> Regeneration {
        let regeneration = self.regenerator.regenerate(&self.spec, &self.history, candidate);
        self.pressure.record(&regeneration);
        regeneration
    }

    /// Close the session. Returns false if it was already closed.
    pub fn close(&mut self, reason: ClosureReason) -> bool {
        if !self.status.is_open() {
            return false;
        }
        info!(
            session_id = %self.id,
            reason = reason.as_str(),
            turns = self.verdicts.len(),
            "Closed persona session"
        );
        self.status = SessionStatus::Closed {
            reason,
            closed_at: Utc::now(),
        };
        true
    }

    /// Replay the turn log through a fresh evaluator and ledger and refresh the
    /// cached coherence score.
    pub async fn recompute_coherence(&mut self) -> CoherenceScore {
        let mut ledger = BudgetLedger::for_spec(&self.spec);
        let mut history: Vec<String> = Vec::new();
        let mut verdicts = Vec::new();

        for recorded in self.recorder.read(..).await {
            verdicts.push(self.evaluator.evaluate(&self.spec, &recorded.turn, &history, &mut ledger));
            history.push(recorded.turn.response.clone());
        }

        self.coherence = CoherenceScore::from_verdicts(&verdicts, &self.spec, &self.coherence_config);
        self.coherence
    }

    /// Copy the session's observable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            persona: Arc::clone(&self.spec),
            status: self.status.clone(),
            opened_at: self.opened_at,
            last_activity: self.last_activity,
            verdicts: self.verdicts.clone(),
            drift_signals: self.drift.signals().to_vec(),
            drifting: self.drift.is_drifting(),
            coherence: self.coherence,
            budget_initial: self.ledger.initial(),
            budget_remaining: self.ledger.remaining(),
            budget_exhausted: self.ledger.is_exhausted(),
            engram_strengths: self.engrams.strengths().clone(),
            pressure: self.pressure.clone(),
        }
    }

    /// Whether no turn has arrived for at least `timeout` as of `now`.
    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.status.is_open()
            && (now - self.last_activity)
                .to_std()
                .map(|elapsed| elapsed >= timeout)
                .unwrap_or(false)
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sealed persona the session is bound to.
    pub fn persona(&self) -> &Arc<SealedPersonaSpec> {
        &self.spec
    }

    /// Lifecycle state.
    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    /// Whether the session accepts turns.
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Cached coherence score.
    pub fn coherence(&self) -> CoherenceScore {
        self.coherence
    }

    /// Handle to the session's turn log.
    pub fn recorder(&self) -> TrajectoryRecorder {
        self.recorder.clone()
    }

    /// Time of the last accepted turn (or of opening).
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Turns evaluated so far.
    pub fn turns(&self) -> usize {
        self.verdicts.len()
    }
}
