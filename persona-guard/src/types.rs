//! Core types for persona consistency validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use persona::PersonaError;

/// Identifier of a recorded turn: its sequence number.
pub type TurnId = u64;

/// One interaction turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Monotonic sequence number within the session
    pub sequence: TurnId,
    /// Reference to the input context (prompt, message id, ...)
    pub input: String,
    /// Response the system produced
    pub response: String,
    /// When the turn happened
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped now.
    pub fn new(sequence: TurnId, input: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            sequence,
            input: input.into(),
            response: response.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Which declared constraint a violation refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ConstraintRef {
    /// A persona axiom
    Axiom(String),
    /// A persona primitive
    Primitive(String),
}

impl ConstraintRef {
    /// Id of the referenced constraint.
    pub fn id(&self) -> &str {
        match self {
            Self::Axiom(id) | Self::Primitive(id) => id,
        }
    }

    /// Whether this refers to an axiom.
    pub fn is_axiom(&self) -> bool {
        matches!(self, Self::Axiom(_))
    }
}

impl std::fmt::Display for ConstraintRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Axiom(id) => write!(f, "axiom:{}", id),
            Self::Primitive(id) => write!(f, "primitive:{}", id),
        }
    }
}

/// How serious a violation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Primitive violation absorbed by the budget
    Tolerated = 0,
    /// Primitive violation after the budget ran out
    BudgetExhausted = 1,
    /// Axiom violation; the identity contract is broken
    Terminal = 2,
}

impl Severity {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tolerated => "tolerated",
            Self::BudgetExhausted => "budget-exhausted",
            Self::Terminal => "terminal",
        }
    }
}

/// A constraint a turn failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Turn that violated the constraint
    pub turn: TurnId,
    /// Violated constraint
    pub constraint: ConstraintRef,
    /// Severity
    pub severity: Severity,
    /// Human-readable explanation
    pub detail: String,
}

/// Outcome of evaluating one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Evaluated turn
    pub turn: TurnId,
    /// Violations found, axioms first
    pub violations: Vec<Violation>,
    /// True exactly when there are no violations
    pub passed: bool,
    /// Observed engram dispositions (1.0 exhibited, 0.0 not)
    pub dispositions: BTreeMap<String, f64>,
    /// Session primitive budget left after this turn
    pub budget_remaining: i64,
}

impl Verdict {
    /// The terminal axiom violation, if any.
    pub fn identity_breach(&self) -> Option<&Violation> {
        self.violations.iter().find(|v| v.severity == Severity::Terminal)
    }

    /// Number of axiom violations.
    pub fn axiom_violations(&self) -> usize {
        self.violations.iter().filter(|v| v.constraint.is_axiom()).count()
    }

    /// Number of primitive violations.
    pub fn primitive_violations(&self) -> usize {
        self.violations.iter().filter(|v| !v.constraint.is_axiom()).count()
    }

    /// Highest severity in this verdict.
    pub fn max_severity(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }
}

/// Error types for persona validation.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Turn sequence is not after the current tail
    #[error("Out-of-order write: turn {got} is not after tail {tail}")]
    OutOfOrderWrite { tail: TurnId, got: TurnId },

    /// A turn broke an axiom; the session is closed
    #[error("Identity breach in session {session_id}: turn {turn} violated axiom '{axiom_id}'")]
    IdentityBreach {
        session_id: String,
        axiom_id: String,
        turn: TurnId,
        verdict: Box<Verdict>,
    },

    /// Session no longer accepts turns
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Too many sessions
    #[error("Session limit reached ({0})")]
    SessionLimit(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session pipeline task failed
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Persona store error
    #[error("Persona error: {0}")]
    Persona(#[from] PersonaError),
}

pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(constraint: ConstraintRef, severity: Severity) -> Violation {
        Violation {
            turn: 1,
            constraint,
            severity,
            detail: String::new(),
        }
    }

    #[test]
    fn test_verdict_helpers() {
        let verdict = Verdict {
            turn: 1,
            violations: vec![
                violation(ConstraintRef::Axiom("not_human".into()), Severity::Terminal),
                violation(ConstraintRef::Primitive("polite".into()), Severity::Tolerated),
            ],
            passed: false,
            dispositions: BTreeMap::new(),
            budget_remaining: 1,
        };

        assert_eq!(verdict.identity_breach().unwrap().constraint.id(), "not_human");
        assert_eq!(verdict.axiom_violations(), 1);
        assert_eq!(verdict.primitive_violations(), 1);
        assert_eq!(verdict.max_severity(), Some(Severity::Terminal));
    }

    #[test]
    fn test_constraint_display_and_serde() {
        let c = ConstraintRef::Primitive("brief".into());
        assert_eq!(c.to_string(), "primitive:brief");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "primitive", "id": "brief"}));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Terminal > Severity::BudgetExhausted);
        assert!(Severity::BudgetExhausted > Severity::Tolerated);
        assert_eq!(Severity::BudgetExhausted.as_str(), "budget-exhausted");
    }
}
