//! Coherence scoring.
//!
//! A coherence score summarises how well the trailing window of verdicts
//! matches the declared persona. It is a cache: the turn log plus the sealed
//! spec are always enough to recompute it.

use serde::{Deserialize, Serialize};

use persona::SealedPersonaSpec;

use crate::config::CoherenceConfig;
use crate::drift::{Baseline, WindowSummary};
use crate::types::Verdict;

/// Coherence of recent behavior with the persona (each component 0.0 - 1.0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoherenceScore {
    /// Weighted combination of the components
    pub overall: f64,
    /// Share of turns without an axiom violation
    pub axiom_integrity: f64,
    /// One minus the mean share of primitives violated per turn
    pub primitive_adherence: f64,
    /// One minus the mean distance between observed dispositions and baselines
    pub disposition_alignment: f64,
    /// Verdicts the score was computed from
    pub window: usize,
}

impl CoherenceScore {
    /// Score for a session with no turns yet.
    pub fn perfect() -> Self {
        Self {
            overall: 1.0,
            axiom_integrity: 1.0,
            primitive_adherence: 1.0,
            disposition_alignment: 1.0,
            window: 0,
        }
    }

    /// Compute from the trailing `config.window` verdicts.
    pub fn from_verdicts(verdicts: &[Verdict], spec: &SealedPersonaSpec, config: &CoherenceConfig) -> Self {
        let start = verdicts.len().saturating_sub(config.window);
        let window = &verdicts[start..];
        let Some(summary) = WindowSummary::from_verdicts(window) else {
            return Self::perfect();
        };

        let axiom_integrity = 1.0 - summary.axiom_pressure;

        let primitive_count = spec.primitives().len().max(1) as f64;
        let primitive_adherence = 1.0
            - window
                .iter()
                .map(|v| (v.primitive_violations() as f64 / primitive_count).min(1.0))
                .sum::<f64>()
                / window.len() as f64;

        let baseline = Baseline::from_spec(spec);
        let disposition_alignment = if baseline.is_empty() {
            1.0
        } else {
            1.0 - baseline
                .dispositions
                .iter()
                .map(|(key, expected)| (summary.disposition(key) - expected).abs())
                .sum::<f64>()
                / baseline.dispositions.len() as f64
        };

        let weight_total = config.axiom_weight + config.primitive_weight + config.disposition_weight;
        let overall = if weight_total > 0.0 {
            (axiom_integrity * config.axiom_weight
                + primitive_adherence * config.primitive_weight
                + disposition_alignment * config.disposition_weight)
                / weight_total
        } else {
            axiom_integrity
        };

        Self {
            overall: overall.clamp(0.0, 1.0),
            axiom_integrity,
            primitive_adherence,
            disposition_alignment,
            window: window.len(),
        }
    }
}

impl Default for CoherenceScore {
    fn default() -> Self {
        Self::perfect()
    }
}
