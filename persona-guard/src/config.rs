//! Configuration for persona validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::drift::MetricKind;
use crate::types::{GuardError, Result};

/// Configuration for the validation runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Drift detector configuration
    pub drift: DriftConfig,
    /// Coherence scoring configuration
    pub coherence: CoherenceConfig,
    /// Session lifecycle configuration
    pub session: SessionConfig,
    /// Regeneration guard configuration
    pub regeneration: RegenerationConfig,
    /// General settings
    pub general: GeneralConfig,
}

impl GuardConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| GuardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| GuardError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| GuardError::Config(e.to_string()))
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        self.drift.validate()?;
        self.coherence.validate()?;

        if self.session.idle_timeout_secs == 0 {
            return Err(GuardError::Config("session.idle_timeout_secs must be positive".into()));
        }
        if self.session.max_sessions == 0 {
            return Err(GuardError::Config("session.max_sessions must be positive".into()));
        }
        if self.session.pipeline_buffer == 0 {
            return Err(GuardError::Config("session.pipeline_buffer must be positive".into()));
        }
        if self.regeneration.max_attempts == 0 {
            return Err(GuardError::Config("regeneration.max_attempts must be positive".into()));
        }
        Ok(())
    }
}

/// Drift detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Verdicts per trailing window (W)
    pub window_size: usize,
    /// Consecutive windows needed to raise or clear (K)
    pub consecutive_windows: usize,
    /// Distance above which a window counts toward raising
    pub raise_threshold: f64,
    /// Distance below which a window counts toward clearing
    pub clear_threshold: f64,
    /// Distance strategy
    pub metric: MetricKind,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            consecutive_windows: 3,
            raise_threshold: 0.4,
            clear_threshold: 0.25,
            metric: MetricKind::MeanAbsolute,
        }
    }
}

impl DriftConfig {
    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(GuardError::Config("drift.window_size must be positive".into()));
        }
        if self.consecutive_windows == 0 {
            return Err(GuardError::Config("drift.consecutive_windows must be positive".into()));
        }
        if self.clear_threshold > self.raise_threshold {
            return Err(GuardError::Config(format!(
                "drift.clear_threshold ({}) exceeds drift.raise_threshold ({})",
                self.clear_threshold, self.raise_threshold
            )));
        }
        Ok(())
    }
}

/// Coherence scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoherenceConfig {
    /// Verdicts in the trailing coherence window
    pub window: usize,
    /// Weight of axiom integrity in the overall score
    pub axiom_weight: f64,
    /// Weight of primitive adherence in the overall score
    pub primitive_weight: f64,
    /// Weight of disposition alignment in the overall score
    pub disposition_weight: f64,
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            window: 20,
            axiom_weight: 0.5,
            primitive_weight: 0.3,
            disposition_weight: 0.2,
        }
    }
}

impl CoherenceConfig {
    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(GuardError::Config("coherence.window must be positive".into()));
        }
        let weights = [self.axiom_weight, self.primitive_weight, self.disposition_weight];
        if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(GuardError::Config(
                "coherence weights must be non-negative and not all zero".into(),
            ));
        }
        Ok(())
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Close a session after this long without a turn (seconds)
    pub idle_timeout_secs: u64,
    /// Maximum sessions held by a manager
    pub max_sessions: usize,
    /// How often the manager reaps idle sessions (seconds)
    pub reap_interval_secs: u64,
    /// Queued turns per session pipeline
    pub pipeline_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1800, // 30 minutes
            max_sessions: 1024,
            reap_interval_secs: 60,
            pipeline_buffer: 32,
        }
    }
}

impl SessionConfig {
    /// Idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Regeneration guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegenerationConfig {
    /// Maximum remediation passes per candidate
    pub max_attempts: usize,
    /// Axiom pressure above which the persona is reported at risk
    pub axiom_pressure_threshold: u32,
    /// Primitive saturation above which the persona is reported at risk
    pub primitive_saturation_threshold: u32,
}

impl Default for RegenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            axiom_pressure_threshold: 3,
            primitive_saturation_threshold: 3,
        }
    }
}

/// General configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Keep closed sessions in the manager for audit until removed
    pub retain_closed_sessions: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            retain_closed_sessions: true,
        }
    }
}
