//! Live engram strengths.
//!
//! Each engram starts at its declared baseline and moves with every verdict
//! according to its decay/reinforcement rule.

use serde::Serialize;
use std::collections::BTreeMap;

use persona::{EngramRule, SealedPersonaSpec};

use crate::types::Verdict;

/// Evolving strengths of a persona's engrams within one session.
#[derive(Debug, Clone, Serialize)]
pub struct EngramState {
    strengths: BTreeMap<String, f64>,
    #[serde(skip)]
    rules: BTreeMap<String, EngramRule>,
}

impl EngramState {
    /// Start every engram at its baseline.
    pub fn from_spec(spec: &SealedPersonaSpec) -> Self {
        Self {
            strengths: spec.engrams().iter().map(|e| (e.key.clone(), e.baseline)).collect(),
            rules: spec.engrams().iter().map(|e| (e.key.clone(), e.rule)).collect(),
        }
    }

    /// Apply one verdict's observed dispositions.
    pub fn observe(&mut self, verdict: &Verdict) {
        for (key, strength) in self.strengths.iter_mut() {
            let observed = verdict.dispositions.get(key).copied().unwrap_or(0.0);
            if let Some(rule) = self.rules.get(key) {
                *strength = rule.step(*strength, observed);
            }
        }
    }

    /// Current strength of one engram.
    pub fn strength(&self, key: &str) -> Option<f64> {
        self.strengths.get(key).copied()
    }

    /// All current strengths.
    pub fn strengths(&self) -> &BTreeMap<String, f64> {
        &self.strengths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persona::{seal, Axiom, Engram, PersonaSpec, Predicate};

    #[test]
    fn test_reinforcement_and_decay() {
        let spec = seal(
            PersonaSpec::new("p")
                .with_axiom(Axiom::new("a", "x", Predicate::forbids("never")))
                .with_engram(Engram::new("warmth", 0.5, vec!["glad".into()]).with_rule(EngramRule {
                    decay: 0.5,
                    reinforcement: 0.5,
                })),
        )
        .unwrap();
        let mut state = EngramState::from_spec(&spec);
        assert_eq!(state.strength("warmth"), Some(0.5));

        let mut dispositions = BTreeMap::new();
        dispositions.insert("warmth".to_string(), 1.0);
        let verdict = Verdict {
            turn: 1,
            violations: vec![],
            passed: true,
            dispositions,
            budget_remaining: 0,
        };
        state.observe(&verdict);
        assert_eq!(state.strength("warmth"), Some(0.75));

        let quiet = Verdict {
            dispositions: BTreeMap::new(),
            ..verdict
        };
        state.observe(&quiet);
        assert_eq!(state.strength("warmth"), Some(0.375));
    }
}
