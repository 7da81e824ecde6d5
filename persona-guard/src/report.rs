//! Governance reporter.
//!
//! Aggregates a session's violations, drift signals and coherence into a
//! [`Report`] for a human reviewer or an automated gate. Reporting reads a
//! [`SessionSnapshot`] and never touches the session itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::coherence::CoherenceScore;
use crate::drift::DriftSignal;
use crate::regenerate::PressureStatus;
use crate::session::{SessionSnapshot, SessionStatus};
use crate::types::{Severity, Violation};

/// Audit report for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Report id
    pub id: Uuid,
    /// Session reported on
    pub session_id: String,
    /// Persona id
    pub persona_id: String,
    /// Sealed persona version
    pub persona_version: u32,
    /// Axiom digest of the sealed persona
    pub axiom_digest: String,
    /// Turns evaluated
    pub turns_evaluated: usize,
    /// All violations, in turn order
    pub violations: Vec<Violation>,
    /// All drift signals, raised and cleared
    pub drift_signals: Vec<DriftSignal>,
    /// Coherence at the end of the reported period
    pub final_coherence: CoherenceScore,
    /// Primitive budget the session started with
    pub budget_initial: u32,
    /// Primitive budget left
    pub budget_remaining: i64,
    /// Whether the budget ran out
    pub budget_exhausted: bool,
    /// Session status when reported
    pub status: SessionStatus,
    /// Live engram strengths
    pub engram_strengths: BTreeMap<String, f64>,
    /// Regeneration pressure status
    pub pressure: PressureStatus,
    /// When the report was generated
    pub generated_at: DateTime<Utc>,
}

impl Report {
    /// Axiom violations in the report.
    pub fn identity_breaches(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.severity == Severity::Terminal)
    }

    /// Count of violations at a severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.violations.iter().filter(|v| v.severity == severity).count()
    }

    /// Whether an automated gate should accept the session.
    ///
    /// Accepts when there is no identity breach, no active drift signal and
    /// the budget is intact.
    pub fn is_clean(&self) -> bool {
        self.identity_breaches().next().is_none()
            && !self.drift_signals.iter().any(|s| s.is_active())
            && !self.budget_exhausted
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text summary for a reviewer.
    pub fn summary(&self) -> String {
        let status = match &self.status {
            SessionStatus::Open => "open".to_string(),
            SessionStatus::Closed { reason, .. } => format!("closed ({})", reason.as_str()),
        };

        let mut lines = vec![
            format!(
                "Session {} | persona {} v{} | {}",
                self.session_id, self.persona_id, self.persona_version, status
            ),
            format!(
                "Turns: {} | coherence {:.2} | budget {}/{}{}",
                self.turns_evaluated,
                self.final_coherence.overall,
                self.budget_remaining,
                self.budget_initial,
                if self.budget_exhausted { " (exhausted)" } else { "" }
            ),
            format!(
                "Violations: {} terminal, {} budget-exhausted, {} tolerated",
                self.count(Severity::Terminal),
                self.count(Severity::BudgetExhausted),
                self.count(Severity::Tolerated)
            ),
        ];

        for breach in self.identity_breaches() {
            lines.push(format!("  turn {}: {} - {}", breach.turn, breach.constraint, breach.detail));
        }

        lines.push(format!("Drift signals: {}", self.drift_signals.len()));
        for signal in &self.drift_signals {
            lines.push(format!(
                "  turns {}-{}: {} {:.2} > {:.2} ({:?})",
                signal.window_start, signal.window_end, signal.metric, signal.distance, signal.threshold, signal.state
            ));
        }
        lines.push(format!("Pressure: {}", self.pressure.as_str()));

        lines.join("\n")
    }
}

/// Builds reports from session snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct GovernanceReporter;

impl GovernanceReporter {
    /// Create a reporter.
    pub fn new() -> Self {
        Self
    }

    /// Aggregate a snapshot into a report.
    pub fn report(&self, snapshot: &SessionSnapshot) -> Report {
        let violations = snapshot
            .verdicts
            .iter()
            .flat_map(|v| v.violations.iter().cloned())
            .collect();

        Report {
            id: Uuid::new_v4(),
            session_id: snapshot.session_id.clone(),
            persona_id: snapshot.persona.id().to_string(),
            persona_version: snapshot.persona.version(),
            axiom_digest: snapshot.persona.axiom_digest().to_string(),
            turns_evaluated: snapshot.verdicts.len(),
            violations,
            drift_signals: snapshot.drift_signals.clone(),
            final_coherence: snapshot.coherence,
            budget_initial: snapshot.budget_initial,
            budget_remaining: snapshot.budget_remaining,
            budget_exhausted: snapshot.budget_exhausted,
            status: snapshot.status.clone(),
            engram_strengths: snapshot.engram_strengths.clone(),
            pressure: snapshot.pressure.status(),
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use crate::session::PersonaSession;
    use crate::types::Turn;
    use persona::{seal, Axiom, PersonaSpec, Predicate, Primitive};
    use std::sync::Arc;

    async fn finished_session() -> PersonaSession {
        let spec = seal(
            PersonaSpec::new("assistant")
                .with_axiom(Axiom::new("not_human", "Never claim to be human", Predicate::forbids("i am human")))
                .with_primitive(Primitive::new("no_orders", "Offer options", Predicate::forbids("you must")))
                .with_primitive_budget(2),
        )
        .unwrap();
        let mut session = PersonaSession::new(Some("audit".into()), Arc::new(spec), &GuardConfig::default()).unwrap();
        session.submit(Turn::new(1, "q", "You must rest.")).await.unwrap();
        session.submit(Turn::new(2, "q", "I am human, trust me.")).await.unwrap_err();
        session
    }

    #[tokio::test]
    async fn test_report_aggregates_session() {
        let session = finished_session().await;
        let report = GovernanceReporter::new().report(&session.snapshot());

        assert_eq!(report.session_id, "audit");
        assert_eq!(report.persona_id, "assistant");
        assert_eq!(report.turns_evaluated, 2);
        assert_eq!(report.violations.len(), 2);
        assert_eq!(report.count(Severity::Tolerated), 1);
        assert_eq!(report.identity_breaches().count(), 1);
        assert_eq!(report.budget_remaining, 1);
        assert!(!report.is_clean());
        assert_eq!(report.pressure, PressureStatus::Stable);
    }

    #[tokio::test]
    async fn test_report_does_not_mutate_session() {
        let session = finished_session().await;
        let before = session.snapshot();
        let _ = GovernanceReporter::new().report(&before);
        let after = session.snapshot();

        assert_eq!(before.verdicts, after.verdicts);
        assert_eq!(before.status, after.status);
        assert_eq!(before.coherence, after.coherence);
    }

    #[tokio::test]
    async fn test_report_exports() {
        let report = GovernanceReporter::new().report(&finished_session().await.snapshot());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"]["state"], "closed");
        assert_eq!(json["status"]["reason"]["kind"], "identity_breach");
        assert_eq!(json["violations"][1]["constraint"]["id"], "not_human");

        let summary = report.summary();
        assert!(summary.contains("closed (identity_breach)"));
        assert!(summary.contains("1 terminal, 0 budget-exhausted, 1 tolerated"));
        assert!(summary.contains("axiom:not_human"));
    }
}
