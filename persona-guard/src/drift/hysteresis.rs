//! Two-threshold gate with consecutive-window confirmation.

/// State change emitted by a [`HysteresisGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    /// Distance stayed above the raise threshold long enough
    Raised,
    /// Distance stayed below the clear threshold long enough
    Cleared,
}

/// Raises after `consecutive` readings above `raise_threshold` and clears
/// after `consecutive` readings below `clear_threshold`. A reading between the
/// thresholds breaks both runs.
#[derive(Debug, Clone)]
pub struct HysteresisGate {
    raise_threshold: f64,
    clear_threshold: f64,
    consecutive: usize,
    raised: bool,
    above_run: usize,
    below_run: usize,
}

impl HysteresisGate {
    /// Create a gate. `consecutive` is clamped to at least 1.
    pub fn new(raise_threshold: f64, clear_threshold: f64, consecutive: usize) -> Self {
        Self {
            raise_threshold,
            clear_threshold: clear_threshold.min(raise_threshold),
            consecutive: consecutive.max(1),
            raised: false,
            above_run: 0,
            below_run: 0,
        }
    }

    /// Feed one distance reading.
    pub fn feed(&mut self, distance: f64) -> Option<GateTransition> {
        if distance > self.raise_threshold {
            self.above_run += 1;
            self.below_run = 0;
        } else if distance < self.clear_threshold {
            self.below_run += 1;
            self.above_run = 0;
        } else {
            self.above_run = 0;
            self.below_run = 0;
        }

        if !self.raised && self.above_run >= self.consecutive {
            self.raised = true;
            self.above_run = 0;
            return Some(GateTransition::Raised);
        }
        if self.raised && self.below_run >= self.consecutive {
            self.raised = false;
            self.below_run = 0;
            return Some(GateTransition::Cleared);
        }
        None
    }

    /// Whether the gate is currently raised.
    pub fn is_raised(&self) -> bool {
        self.raised
    }

    /// Readings in the current above-threshold run.
    pub fn above_run(&self) -> usize {
        self.above_run
    }

    /// Raise threshold.
    pub fn raise_threshold(&self) -> f64 {
        self.raise_threshold
    }

    /// Clear threshold.
    pub fn clear_threshold(&self) -> f64 {
        self.clear_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(gate: &mut HysteresisGate, readings: &[f64]) -> Vec<(usize, GateTransition)> {
        readings
            .iter()
            .enumerate()
            .filter_map(|(i, d)| gate.feed(*d).map(|t| (i, t)))
            .collect()
    }

    #[test]
    fn test_single_crossing_does_not_fire() {
        let mut gate = HysteresisGate::new(0.5, 0.3, 3);
        let transitions = run(&mut gate, &[0.1, 0.2, 0.9, 0.1, 0.2, 0.1]);
        assert!(transitions.is_empty());
        assert!(!gate.is_raised());
    }

    #[test]
    fn test_raises_after_k_and_clears_after_k() {
        let mut gate = HysteresisGate::new(0.5, 0.3, 3);
        let transitions = run(&mut gate, &[0.6, 0.7, 0.8, 0.9, 0.1, 0.1, 0.1]);
        assert_eq!(transitions, vec![(2, GateTransition::Raised), (6, GateTransition::Cleared)]);
    }

    #[test]
    fn test_band_between_thresholds_resets_runs() {
        let mut gate = HysteresisGate::new(0.5, 0.3, 2);
        // 0.4 sits between the thresholds and breaks the run.
        assert!(run(&mut gate, &[0.6, 0.4, 0.6, 0.4]).is_empty());

        assert_eq!(run(&mut gate, &[0.6, 0.6]), vec![(1, GateTransition::Raised)]);
        // Staying in the band keeps the signal raised.
        assert!(run(&mut gate, &[0.4, 0.4, 0.4, 0.2, 0.4, 0.2]).is_empty());
        assert!(gate.is_raised());
        assert_eq!(run(&mut gate, &[0.2, 0.2]), vec![(1, GateTransition::Cleared)]);
    }

    #[test]
    fn test_flapping_around_threshold_is_suppressed() {
        let mut gate = HysteresisGate::new(0.5, 0.5, 2);
        assert!(run(&mut gate, &[0.6, 0.4, 0.6, 0.4, 0.6, 0.4]).is_empty());
    }
}
