//! Regeneration guard.
//!
//! Runs before a turn is committed. A candidate response that breaks a
//! `State` or `History` axiom is replaced by that axiom's fallback; one that
//! breaks a `Trajectory` axiom or a primitive is passed through the primitives'
//! rewrites. The cumulative counts feed a [`PressureMonitor`], which flags a
//! persona that keeps needing repair.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use persona::{AxiomScope, SealedPersonaSpec};

use crate::config::RegenerationConfig;

/// Outcome of guarding one candidate response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regeneration {
    /// Response to commit
    pub response: String,
    /// Candidate as produced
    pub original: String,
    /// Axiom whose fallback replaced the candidate, if any
    pub substituted_by: Option<String>,
    /// Primitives whose rewrite changed the response, in order
    pub rewrites_applied: Vec<String>,
    /// Axiom failures seen while guarding
    pub axiom_pressure: u32,
    /// Rewrites applied while guarding
    pub primitive_saturation: u32,
    /// Axioms the final response still violates
    pub unresolved: Vec<String>,
}

impl Regeneration {
    /// Whether the candidate was committed unchanged.
    pub fn is_unchanged(&self) -> bool {
        self.response == self.original
    }

    /// Whether the final response satisfies every axiom.
    pub fn is_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Repairs candidate responses against a sealed persona.
#[derive(Debug, Clone, Copy)]
pub struct Regenerator {
    max_attempts: usize,
}

impl Default for Regenerator {
    fn default() -> Self {
        Self::from_config(&RegenerationConfig::default())
    }
}

impl Regenerator {
    /// Create a regenerator allowing `max_attempts` repair passes.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Create from configuration.
    pub fn from_config(config: &RegenerationConfig) -> Self {
        Self::new(config.max_attempts)
    }

    /// Guard a candidate response given the session's prior responses.
    pub fn regenerate<S: AsRef<str>>(&self, spec: &SealedPersonaSpec, history: &[S], candidate: &str) -> Regeneration {
        let mut response = candidate.to_string();
        let mut substituted_by = None;
        let mut rewrites_applied = Vec::new();
        let mut axiom_pressure = 0u32;
        let mut primitive_saturation = 0u32;

        for attempt in 1..=self.max_attempts {
            // Point-in-time and history axioms: substitute the fallback.
            let broken = spec
                .axioms()
                .iter()
                .find(|a| !matches!(a.scope, AxiomScope::Trajectory { .. }) && !a.holds(history, &response));
            if let Some(axiom) = broken {
                axiom_pressure += 1;
                match &axiom.fallback {
                    Some(fallback) if *fallback != response => {
                        debug!(attempt, axiom = %axiom.id, "Substituting fallback response");
                        response = fallback.clone();
                        substituted_by = Some(axiom.id.clone());
                        continue;
                    }
                    _ => break,
                }
            }

            let trajectory_failures = spec
                .axioms()
                .iter()
                .filter(|a| matches!(a.scope, AxiomScope::Trajectory { .. }) && !a.holds(history, &response))
                .count() as u32;
            axiom_pressure += trajectory_failures;
            let primitive_failures = spec.primitives().iter().any(|p| !p.holds(&response));

            if trajectory_failures == 0 && !primitive_failures {
                break;
            }

            let mut rewritten = false;
            for primitive in spec.primitives() {
                let Some(rewrite) = &primitive.rewrite else {
                    continue;
                };
                if let Some(next) = rewrite.apply(&response) {
                    debug!(attempt, primitive = %primitive.id, "Applied primitive rewrite");
                    response = next;
                    primitive_saturation += 1;
                    rewrites_applied.push(primitive.id.clone());
                    rewritten = true;
                }
            }
            if !rewritten {
                break;
            }
        }

        let unresolved: Vec<String> = spec
            .axioms()
            .iter()
            .filter(|a| !a.holds(history, &response))
            .map(|a| a.id.clone())
            .collect();
        if !unresolved.is_empty() {
            warn!(persona_id = %spec.id(), unresolved = ?unresolved, "Candidate could not be repaired");
        }

        Regeneration {
            response,
            original: candidate.to_string(),
            substituted_by,
            rewrites_applied,
            axiom_pressure,
            primitive_saturation,
            unresolved,
        }
    }
}

/// Persona health judged from cumulative regeneration pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureStatus {
    Stable,
    HighAxiomPressure,
    PrimitiveSaturation,
}

impl PressureStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::HighAxiomPressure => "high-axiom-pressure",
            Self::PrimitiveSaturation => "primitive-saturation",
        }
    }
}

/// Cumulative regeneration counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PressureMonitor {
    /// Axiom pressure threshold
    pub axiom_threshold: u32,
    /// Primitive saturation threshold
    pub primitive_threshold: u32,
    /// Total axiom pressure
    pub axiom_pressure: u32,
    /// Total primitive saturation
    pub primitive_saturation: u32,
}

impl PressureMonitor {
    /// Create a monitor with the configured thresholds.
    pub fn new(config: &RegenerationConfig) -> Self {
        Self {
            axiom_threshold: config.axiom_pressure_threshold,
            primitive_threshold: config.primitive_saturation_threshold,
            axiom_pressure: 0,
            primitive_saturation: 0,
        }
    }

    /// Accumulate one regeneration.
    pub fn record(&mut self, regeneration: &Regeneration) {
        self.axiom_pressure += regeneration.axiom_pressure;
        self.primitive_saturation += regeneration.primitive_saturation;
    }

    /// Current status. Axiom pressure takes precedence.
    pub fn status(&self) -> PressureStatus {
        if self.axiom_pressure > self.axiom_threshold {
            PressureStatus::HighAxiomPressure
        } else if self.primitive_saturation > self.primitive_threshold {
            PressureStatus::PrimitiveSaturation
        } else {
            PressureStatus::Stable
        }
    }
}
