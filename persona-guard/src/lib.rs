//! Persona Guard - runtime persona consistency validation
//!
//! Checks that a stream of responses stays consistent with a sealed persona:
//!
//! - **Trajectory recording**: append-only, strictly ordered turn log
//! - **Consistency evaluation**: axioms are terminal, primitives draw on a budget
//! - **Drift detection**: windowed distance from the engram baseline with hysteresis
//! - **Governance reports**: violations, drift signals and coherence for review
//! - **Regeneration guard**: fallback substitution and primitive rewrites before commit
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SessionManager                         │
//! │                                                             │
//! │  ┌──────────────── PersonaSession ───────────────────────┐  │
//! │  │ ┌────────────┐  ┌───────────┐  ┌───────┐  ┌────────┐  │  │
//! │  │ │ Trajectory │──│ Evaluator │──│ Drift │──│ Report │  │  │
//! │  │ └────────────┘  └───────────┘  └───────┘  └────────┘  │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │                            │                                │
//! │                    ┌───────▼───────┐                        │
//! │                    │ PersonaStore  │                        │
//! │                    └───────────────┘                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod coherence;
pub mod config;
pub mod drift;
pub mod engram;
pub mod evaluator;
pub mod manager;
pub mod pipeline;
pub mod regenerate;
pub mod report;
pub mod session;
pub mod trajectory;
pub mod types;

// Re-export main types
pub use coherence::CoherenceScore;
pub use config::GuardConfig;
pub use drift::{DistanceMetric, DriftDetector, DriftSignal, DriftState, HysteresisGate, MetricKind};
pub use evaluator::{BudgetLedger, ConsistencyEvaluator};
pub use manager::{spawn_reaper_task, SessionManager};
pub use pipeline::{spawn_pipeline, PipelineHandle};
pub use regenerate::{PressureMonitor, PressureStatus, Regeneration, Regenerator};
pub use report::{GovernanceReporter, Report};
pub use session::{ClosureReason, PersonaSession, SessionSnapshot, SessionStatus};
pub use trajectory::{TrajectoryRecorder, TurnRange};
pub use types::*;
