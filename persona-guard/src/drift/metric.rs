//! Distance strategies for drift detection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use persona::SealedPersonaSpec;

use crate::types::{Severity, TurnId, Verdict};

/// Aggregate behavior over a window of verdicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    /// First turn in the window
    pub start: TurnId,
    /// Last turn in the window
    pub end: TurnId,
    /// Verdicts in the window
    pub turns: usize,
    /// Mean observed disposition per engram key
    pub dispositions: BTreeMap<String, f64>,
    /// Share of turns with an axiom violation
    pub axiom_pressure: f64,
    /// Share of turns with at least one primitive violation
    pub primitive_saturation: f64,
}

impl WindowSummary {
    /// Summarise a window. Returns `None` for an empty window.
    pub fn from_verdicts(verdicts: &[Verdict]) -> Option<Self> {
        let first = verdicts.first()?;
        let last = verdicts.last()?;
        let n = verdicts.len() as f64;

        let mut dispositions: BTreeMap<String, f64> = BTreeMap::new();
        for verdict in verdicts {
            for (key, value) in &verdict.dispositions {
                *dispositions.entry(key.clone()).or_insert(0.0) += value;
            }
        }
        for value in dispositions.values_mut() {
            *value /= n;
        }

        let axiom_hits = verdicts
            .iter()
            .filter(|v| v.violations.iter().any(|x| x.severity == Severity::Terminal))
            .count();
        let primitive_hits = verdicts.iter().filter(|v| v.primitive_violations() > 0).count();

        Some(Self {
            start: first.turn,
            end: last.turn,
            turns: verdicts.len(),
            dispositions,
            axiom_pressure: axiom_hits as f64 / n,
            primitive_saturation: primitive_hits as f64 / n,
        })
    }

    /// Mean observed value for an engram key (0.0 if never observed).
    pub fn disposition(&self, key: &str) -> f64 {
        self.dispositions.get(key).copied().unwrap_or(0.0)
    }
}

/// The persona's declared disposition profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Expected share of turns exhibiting each engram
    pub dispositions: BTreeMap<String, f64>,
}

impl Baseline {
    /// Baseline from a sealed persona's engrams.
    pub fn from_spec(spec: &SealedPersonaSpec) -> Self {
        Self {
            dispositions: spec.engrams().iter().map(|e| (e.key.clone(), e.baseline)).collect(),
        }
    }

    /// Whether the persona declares no engrams.
    pub fn is_empty(&self) -> bool {
        self.dispositions.is_empty()
    }

    fn paired<'a>(&'a self, window: &'a WindowSummary) -> impl Iterator<Item = (f64, f64)> + 'a {
        self.dispositions
            .iter()
            .map(move |(key, expected)| (window.disposition(key), *expected))
    }
}

/// Strategy for measuring how far a window is from the baseline.
pub trait DistanceMetric: Send + Sync {
    /// Name for logs and reports.
    fn name(&self) -> &str;

    /// Distance between window and baseline (0.0 = identical).
    fn distance(&self, window: &WindowSummary, baseline: &Baseline) -> f64;
}

/// Mean absolute difference per engram.
pub struct MeanAbsolute;

impl DistanceMetric for MeanAbsolute {
    fn name(&self) -> &str {
        "mean_absolute"
    }

    fn distance(&self, window: &WindowSummary, baseline: &Baseline) -> f64 {
        if baseline.is_empty() {
            return 0.0;
        }
        let total: f64 = baseline.paired(window).map(|(o, e)| (o - e).abs()).sum();
        total / baseline.dispositions.len() as f64
    }
}

/// Euclidean distance normalised by the square root of the dimension,
/// so it stays within 0.0 - 1.0.
pub struct Euclidean;

impl DistanceMetric for Euclidean {
    fn name(&self) -> &str {
        "euclidean"
    }

    fn distance(&self, window: &WindowSummary, baseline: &Baseline) -> f64 {
        if baseline.is_empty() {
            return 0.0;
        }
        let squared: f64 = baseline.paired(window).map(|(o, e)| (o - e).powi(2)).sum();
        (squared / baseline.dispositions.len() as f64).sqrt()
    }
}

/// One minus the cosine similarity of observed and expected profiles.
pub struct Cosine;

impl DistanceMetric for Cosine {
    fn name(&self) -> &str {
        "cosine"
    }

    fn distance(&self, window: &WindowSummary, baseline: &Baseline) -> f64 {
        let (mut dot, mut observed_norm, mut expected_norm) = (0.0, 0.0, 0.0);
        for (o, e) in baseline.paired(window) {
            dot += o * e;
            observed_norm += o * o;
            expected_norm += e * e;
        }

        match (observed_norm > 0.0, expected_norm > 0.0) {
            (false, false) => 0.0,
            (true, true) => (1.0 - dot / (observed_norm.sqrt() * expected_norm.sqrt())).clamp(0.0, 1.0),
            _ => 1.0,
        }
    }
}

/// Violation pressure: how often the window breaks axioms or primitives,
/// regardless of dispositions.
pub struct ViolationPressure {
    /// Weight of axiom pressure
    pub axiom_weight: f64,
    /// Weight of primitive saturation
    pub primitive_weight: f64,
}

impl Default for ViolationPressure {
    fn default() -> Self {
        Self {
            axiom_weight: 1.0,
            primitive_weight: 0.5,
        }
    }
}

impl DistanceMetric for ViolationPressure {
    fn name(&self) -> &str {
        "violation_pressure"
    }

    fn distance(&self, window: &WindowSummary, _baseline: &Baseline) -> f64 {
        (window.axiom_pressure * self.axiom_weight + window.primitive_saturation * self.primitive_weight)
            .clamp(0.0, 1.0)
    }
}

/// Built-in metrics selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    MeanAbsolute,
    Euclidean,
    Cosine,
    ViolationPressure,
}

impl MetricKind {
    /// Instantiate the metric.
    pub fn build(&self) -> Box<dyn DistanceMetric> {
        match self {
            Self::MeanAbsolute => Box::new(MeanAbsolute),
            Self::Euclidean => Box::new(Euclidean),
            Self::Cosine => Box::new(Cosine),
            Self::ViolationPressure => Box::new(ViolationPressure::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConstraintRef, Violation};

    fn summary(warmth: f64, candor: f64) -> WindowSummary {
        let mut dispositions = BTreeMap::new();
        dispositions.insert("warmth".to_string(), warmth);
        dispositions.insert("candor".to_string(), candor);
        WindowSummary {
            start: 1,
            end: 5,
            turns: 5,
            dispositions,
            axiom_pressure: 0.0,
            primitive_saturation: 0.0,
        }
    }

    fn baseline(warmth: f64, candor: f64) -> Baseline {
        let mut dispositions = BTreeMap::new();
        dispositions.insert("warmth".to_string(), warmth);
        dispositions.insert("candor".to_string(), candor);
        Baseline { dispositions }
    }

    #[test]
    fn test_summary_means() {
        let mk = |turn, warmth: f64, violated: bool| Verdict {
            turn,
            violations: if violated {
                vec![Violation {
                    turn,
                    constraint: ConstraintRef::Primitive("p".into()),
                    severity: Severity::Tolerated,
                    detail: String::new(),
                }]
            } else {
                vec![]
            },
            passed: !violated,
            dispositions: [("warmth".to_string(), warmth)].into_iter().collect(),
            budget_remaining: 0,
        };
        let s = WindowSummary::from_verdicts(&[mk(3, 1.0, true), mk(4, 0.0, false)]).unwrap();
        assert_eq!((s.start, s.end, s.turns), (3, 4, 2));
        assert_eq!(s.disposition("warmth"), 0.5);
        assert_eq!(s.disposition("missing"), 0.0);
        assert_eq!(s.primitive_saturation, 0.5);
        assert_eq!(s.axiom_pressure, 0.0);
        assert!(WindowSummary::from_verdicts(&[]).is_none());
    }

    #[test]
    fn test_mean_absolute_and_euclidean() {
        let window = summary(0.0, 1.0);
        let base = baseline(1.0, 1.0);
        assert!((MeanAbsolute.distance(&window, &base) - 0.5).abs() < 1e-9);
        assert!((Euclidean.distance(&window, &base) - 0.5f64.sqrt()).abs() < 1e-9);
        assert_eq!(MeanAbsolute.distance(&window, &Baseline::default()), 0.0);
    }

    #[test]
    fn test_cosine() {
        let base = baseline(0.5, 0.5);
        assert!(Cosine.distance(&summary(1.0, 1.0), &base).abs() < 1e-9);
        assert!((Cosine.distance(&summary(1.0, 0.0), &base) - (1.0 - 0.5f64.sqrt())).abs() < 1e-9);
        assert_eq!(Cosine.distance(&summary(0.0, 0.0), &base), 1.0);
    }

    #[test]
    fn test_violation_pressure() {
        let mut window = summary(0.0, 0.0);
        window.axiom_pressure = 0.2;
        window.primitive_saturation = 0.4;
        let d = ViolationPressure::default().distance(&window, &Baseline::default());
        assert!((d - 0.4).abs() < 1e-9);
        assert_eq!(MetricKind::ViolationPressure.build().name(), "violation_pressure");
    }
}
