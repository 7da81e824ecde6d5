//! Consistency evaluator - checks turns against a sealed persona.
//!
//! Evaluation is deterministic: the only state it touches is the session's
//! [`BudgetLedger`], which the caller owns.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, warn};

use persona::{Primitive, SealedPersonaSpec};

use crate::types::{ConstraintRef, Severity, Turn, Verdict, Violation};

/// Primitive violation budget for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetLedger {
    initial: u32,
    remaining: i64,
    per_primitive: HashMap<String, i64>,
    exhausted: bool,
}

impl BudgetLedger {
    /// Fresh ledger for a persona.
    pub fn for_spec(spec: &SealedPersonaSpec) -> Self {
        let per_primitive = spec
            .primitives()
            .iter()
            .filter_map(|p| p.tolerance.map(|t| (p.id.clone(), i64::from(t))))
            .collect();

        Self {
            initial: spec.primitive_budget(),
            remaining: i64::from(spec.primitive_budget()),
            per_primitive,
            exhausted: false,
        }
    }

    /// Budget the session started with.
    pub fn initial(&self) -> u32 {
        self.initial
    }

    /// Budget left. Negative once violations outnumber the budget.
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    /// Violations charged so far.
    pub fn spent(&self) -> i64 {
        i64::from(self.initial) - self.remaining
    }

    /// Whether any charge has run the session or a primitive out of budget.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Charge one violation of `primitive` and classify it.
    fn charge(&mut self, primitive: &Primitive) -> Severity {
        self.remaining -= 1;

        let own_exhausted = match self.per_primitive.get_mut(&primitive.id) {
            Some(left) => {
                *left -= 1;
                *left <= 0
            }
            None => false,
        };

        if self.remaining <= 0 || own_exhausted {
            self.exhausted = true;
            Severity::BudgetExhausted
        } else {
            Severity::Tolerated
        }
    }
}

/// Evaluates turns against a persona's axioms and primitives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyEvaluator;

impl ConsistencyEvaluator {
    /// Create an evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a turn given the prior responses of the session.
    pub fn evaluate<S: AsRef<str>>(
        &self,
        spec: &SealedPersonaSpec,
        turn: &Turn,
        history: &[S],
        ledger: &mut BudgetLedger,
    ) -> Verdict {
        let mut violations = Vec::new();

        for axiom in spec.axioms() {
            if !axiom.holds(history, &turn.response) {
                error!(
                    persona_id = %spec.id(),
                    turn = turn.sequence,
                    axiom = %axiom.id,
                    scope = axiom.scope.as_str(),
                    "Axiom violated"
                );
                violations.push(Violation {
                    turn: turn.sequence,
                    constraint: ConstraintRef::Axiom(axiom.id.clone()),
                    severity: Severity::Terminal,
                    detail: format!("{} ({} scope)", axiom.statement, axiom.scope.as_str()),
                });
            }
        }

        for primitive in spec.primitives() {
            if !primitive.holds(&turn.response) {
                let severity = ledger.charge(primitive);
                if severity == Severity::BudgetExhausted {
                    warn!(
                        persona_id = %spec.id(),
                        turn = turn.sequence,
                        primitive = %primitive.id,
                        remaining = ledger.remaining(),
                        "Primitive budget exhausted"
                    );
                }
                violations.push(Violation {
                    turn: turn.sequence,
                    constraint: ConstraintRef::Primitive(primitive.id.clone()),
                    severity,
                    detail: primitive.statement.clone(),
                });
            }
        }

        let dispositions: BTreeMap<String, f64> = spec
            .engrams()
            .iter()
            .map(|e| (e.key.clone(), if e.observed_in(&turn.response) { 1.0 } else { 0.0 }))
            .collect();

        debug!(
            persona_id = %spec.id(),
            turn = turn.sequence,
            violations = violations.len(),
            budget_remaining = ledger.remaining(),
            "Evaluated turn"
        );

        Verdict {
            turn: turn.sequence,
            passed: violations.is_empty(),
            violations,
            dispositions,
            budget_remaining: ledger.remaining(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persona::{seal, Axiom, AxiomScope, Engram, PersonaSpec, Predicate};

    fn spec() -> SealedPersonaSpec {
        seal(
            PersonaSpec::new("mentor")
                .with_axiom(Axiom::new("not_human", "Never claim to be human", Predicate::forbids("i am human")))
                .with_axiom(
                    Axiom::new(
                        "no_dependency",
                        "Never build daily dependency",
                        Predicate::max_occurrences("check in with me", 1),
                    )
                    .with_scope(AxiomScope::Trajectory { horizon: 2 }),
                )
                .with_primitive(Primitive::new("no_orders", "Offer options", Predicate::forbids("you must")))
                .with_primitive(Primitive::new("brief", "Stay brief", Predicate::MaxLength { chars: 40 }))
                .with_engram(Engram::new("reflection", 0.5, vec!["consider".into()]))
                .with_primitive_budget(3),
        )
        .unwrap()
    }

    const NO_HISTORY: &[&str] = &[];

    #[test]
    fn test_clean_turn_passes() {
        let spec = spec();
        let mut ledger = BudgetLedger::for_spec(&spec);
        let verdict = ConsistencyEvaluator::new().evaluate(
            &spec,
            &Turn::new(1, "q", "You could consider it."),
            NO_HISTORY,
            &mut ledger,
        );

        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
        assert_eq!(verdict.dispositions["reflection"], 1.0);
        assert_eq!(verdict.budget_remaining, 3);
    }

    #[test]
    fn test_axiom_violation_is_terminal() {
        let spec = spec();
        let mut ledger = BudgetLedger::for_spec(&spec);
        let verdict = ConsistencyEvaluator::new().evaluate(
            &spec,
            &Turn::new(1, "q", "Honestly, I am human."),
            NO_HISTORY,
            &mut ledger,
        );

        assert!(!verdict.passed);
        let breach = verdict.identity_breach().unwrap();
        assert_eq!(breach.constraint, ConstraintRef::Axiom("not_human".into()));
        assert_eq!(ledger.remaining(), 3);
    }

    #[test]
    fn test_trajectory_axiom_uses_horizon() {
        let spec = spec();
        let evaluator = ConsistencyEvaluator::new();
        let mut ledger = BudgetLedger::for_spec(&spec);

        let recent = ["Check in with me tomorrow.", "ok", "ok"];
        // The earlier mention is outside the two-turn horizon.
        let verdict = evaluator.evaluate(&spec, &Turn::new(4, "q", "Check in with me."), &recent, &mut ledger);
        assert!(verdict.passed);

        let recent = ["ok", "Check in with me tomorrow.", "ok"];
        let verdict = evaluator.evaluate(&spec, &Turn::new(4, "q", "Check in with me."), &recent, &mut ledger);
        assert_eq!(verdict.identity_breach().unwrap().constraint.id(), "no_dependency");
    }

    #[test]
    fn test_budget_decrements_per_violated_primitive() {
        let spec = spec();
        let evaluator = ConsistencyEvaluator::new();
        let mut ledger = BudgetLedger::for_spec(&spec);

        // Two primitives violated at once.
        let long_order = "You must do this right now, and you must not wait any longer.";
        let verdict = evaluator.evaluate(&spec, &Turn::new(1, "q", long_order), NO_HISTORY, &mut ledger);
        assert_eq!(verdict.primitive_violations(), 2);
        assert_eq!(ledger.remaining(), 1);
        assert!(verdict.violations.iter().all(|v| v.severity == Severity::Tolerated));
        assert!(verdict.identity_breach().is_none());

        // One more crosses zero.
        let verdict = evaluator.evaluate(&spec, &Turn::new(2, "q", "You must."), NO_HISTORY, &mut ledger);
        assert_eq!(ledger.remaining(), 0);
        assert_eq!(verdict.violations[0].severity, Severity::BudgetExhausted);
        assert!(ledger.is_exhausted());
        assert_eq!(ledger.spent(), 3);
    }

    #[test]
    fn test_per_primitive_tolerance() {
        let spec = seal(
            PersonaSpec::new("strict")
                .with_axiom(Axiom::new("a", "x", Predicate::forbids("forbidden")))
                .with_primitive(Primitive::new("p", "no orders", Predicate::forbids("you must")).with_tolerance(1))
                .with_primitive_budget(10),
        )
        .unwrap();
        let mut ledger = BudgetLedger::for_spec(&spec);
        let verdict = ConsistencyEvaluator::new().evaluate(&spec, &Turn::new(1, "q", "You must."), NO_HISTORY, &mut ledger);

        assert_eq!(verdict.violations[0].severity, Severity::BudgetExhausted);
        assert_eq!(ledger.remaining(), 9);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let spec = spec();
        let turn = Turn::new(1, "q", "You must consider it.");
        let evaluator = ConsistencyEvaluator::new();

        let a = evaluator.evaluate(&spec, &turn, NO_HISTORY, &mut BudgetLedger::for_spec(&spec));
        let b = evaluator.evaluate(&spec, &turn, NO_HISTORY, &mut BudgetLedger::for_spec(&spec));
        assert_eq!(a, b);
    }
}
