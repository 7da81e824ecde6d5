//! Drift detection.
//!
//! Behavior is summarised over a sliding window of the last W verdicts and
//! compared with the persona's engram baseline through a pluggable
//! [`DistanceMetric`]. A [`HysteresisGate`] turns the stream of distances into
//! raise/clear signals so a single noisy window never fires one.

mod hysteresis;
mod metric;

pub use hysteresis::{GateTransition, HysteresisGate};
pub use metric::{Baseline, Cosine, DistanceMetric, Euclidean, MeanAbsolute, MetricKind, ViolationPressure, WindowSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::config::DriftConfig;
use crate::types::{Result, TurnId, Verdict};

/// Whether a drift signal is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftState {
    Raised,
    Cleared,
}

/// A sustained deviation from the persona baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSignal {
    /// First turn of the window that raised the signal
    pub window_start: TurnId,
    /// Last turn of the window that raised the signal
    pub window_end: TurnId,
    /// Distance of the raising window
    pub distance: f64,
    /// Raise threshold in effect
    pub threshold: f64,
    /// Metric that measured the distance
    pub metric: String,
    /// Current state
    pub state: DriftState,
    /// When the signal was raised
    pub raised_at: DateTime<Utc>,
    /// When the signal cleared
    pub cleared_at: Option<DateTime<Utc>>,
    /// Distance of the window that cleared it
    pub cleared_distance: Option<f64>,
}

impl DriftSignal {
    /// Whether the signal has not cleared yet.
    pub fn is_active(&self) -> bool {
        self.state == DriftState::Raised
    }
}

/// Sliding-window drift detector for one session.
pub struct DriftDetector {
    window_size: usize,
    metric: Box<dyn DistanceMetric>,
    baseline: Baseline,
    gate: HysteresisGate,
    window: VecDeque<Verdict>,
    signals: Vec<DriftSignal>,
    last_distance: Option<f64>,
}

impl DriftDetector {
    /// Create a detector using the configured metric.
    pub fn new(config: &DriftConfig, baseline: Baseline) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            window_size: config.window_size,
            metric: config.metric.build(),
            baseline,
            gate: HysteresisGate::new(config.raise_threshold, config.clear_threshold, config.consecutive_windows),
            window: VecDeque::with_capacity(config.window_size),
            signals: Vec::new(),
            last_distance: None,
        })
    }

    /// Replace the distance metric.
    pub fn with_metric(mut self, metric: Box<dyn DistanceMetric>) -> Self {
        self.metric = metric;
        self
    }

    /// Feed the next verdict. Returns a signal when drift is raised or cleared.
    ///
    /// Nothing is measured until the window holds W verdicts.
    pub fn update(&mut self, verdict: &Verdict) -> Option<DriftSignal> {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(verdict.clone());
        if self.window.len() < self.window_size {
            return None;
        }

        let summary = WindowSummary::from_verdicts(self.window.make_contiguous())?;
        let distance = self.metric.distance(&summary, &self.baseline);
        self.last_distance = Some(distance);

        debug!(
            window_start = summary.start,
            window_end = summary.end,
            distance,
            metric = self.metric.name(),
            "Measured drift window"
        );

        match self.gate.feed(distance)? {
            GateTransition::Raised => {
                warn!(
                    window_start = summary.start,
                    window_end = summary.end,
                    distance,
                    threshold = self.gate.raise_threshold(),
                    metric = self.metric.name(),
                    "Persona drift raised"
                );
                let signal = DriftSignal {
                    window_start: summary.start,
                    window_end: summary.end,
                    distance,
                    threshold: self.gate.raise_threshold(),
                    metric: self.metric.name().to_string(),
                    state: DriftState::Raised,
                    raised_at: Utc::now(),
                    cleared_at: None,
                    cleared_distance: None,
                };
                self.signals.push(signal.clone());
                Some(signal)
            }
            GateTransition::Cleared => {
                info!(window_end = summary.end, distance, "Persona drift cleared");
                let signal = self.signals.iter_mut().rev().find(|s| s.is_active())?;
                signal.state = DriftState::Cleared;
                signal.cleared_at = Some(Utc::now());
                signal.cleared_distance = Some(distance);
                Some(signal.clone())
            }
        }
    }

    /// Feed several verdicts, collecting every signal emitted.
    pub fn update_all<'a>(&mut self, verdicts: impl IntoIterator<Item = &'a Verdict>) -> Vec<DriftSignal> {
        verdicts.into_iter().filter_map(|v| self.update(v)).collect()
    }

    /// Whether drift is currently raised.
    pub fn is_drifting(&self) -> bool {
        self.gate.is_raised()
    }

    /// All signals raised so far, in order.
    pub fn signals(&self) -> &[DriftSignal] {
        &self.signals
    }

    /// Distance of the most recent full window.
    pub fn last_distance(&self) -> Option<f64> {
        self.last_distance
    }

    /// Name of the metric in use.
    pub fn metric_name(&self) -> &str {
        self.metric.name()
    }
}
