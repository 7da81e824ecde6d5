//! Per-session evaluation pipeline.
//!
//! One task per session owns the [`PersonaSession`] and consumes turns from a
//! bounded channel in arrival order. The only suspension point is waiting for
//! the next turn, which is bounded by the idle timeout. The task ends when the
//! session closes (breach, idle, explicit close or the handle going away) and
//! resolves to the session's final [`Report`].

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::report::{GovernanceReporter, Report};
use crate::session::{ClosureReason, PersonaSession};
use crate::types::{GuardError, Result, Turn, Verdict};

enum Command {
    Turn {
        turn: Turn,
        reply: oneshot::Sender<Result<Verdict>>,
    },
    Close(ClosureReason),
}

/// Handle to a running session pipeline.
///
/// Dropping the handle cancels the pipeline and closes the session.
pub struct PipelineHandle {
    session_id: String,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<Report>,
}

impl PipelineHandle {
    /// Session the pipeline evaluates.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Submit a turn and wait for its verdict.
    pub async fn submit(&self, turn: Turn) -> Result<Verdict> {
        let (reply, verdict) = oneshot::channel();
        self.commands
            .send(Command::Turn { turn, reply })
            .await
            .map_err(|_| GuardError::SessionClosed(self.session_id.clone()))?;
        verdict
            .await
            .map_err(|_| GuardError::SessionClosed(self.session_id.clone()))?
    }

    /// Whether the pipeline has stopped accepting turns.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Close the session and wait for the final report.
    pub async fn close(self, reason: ClosureReason) -> Result<Report> {
        // The pipeline may already have stopped on its own.
        let _ = self.commands.send(Command::Close(reason)).await;
        self.wait().await
    }

    /// Wait for the pipeline to end on its own (breach or idle timeout).
    pub async fn wait(self) -> Result<Report> {
        let Self {
            session_id,
            commands,
            task,
        } = self;
        let report = task
            .await
            .map_err(|e| GuardError::Pipeline(format!("session {}: {}", session_id, e)));
        drop(commands);
        report
    }
}

/// Spawn the evaluation pipeline for a session.
pub fn spawn_pipeline(mut session: PersonaSession, config: &SessionConfig) -> PipelineHandle {
    let (commands, mut inbox) = mpsc::channel::<Command>(config.pipeline_buffer.max(1));
    let idle_timeout = config.idle_timeout();
    let session_id = session.id().to_string();

    let task = tokio::spawn(async move {
        while session.is_open() {
            match tokio::time::timeout(idle_timeout, inbox.recv()).await {
                Ok(Some(Command::Turn { turn, reply })) => {
                    let sequence = turn.sequence;
                    let result = session.submit(turn).await;
                    if reply.send(result).is_err() {
                        debug!(session_id = %session.id(), turn = sequence, "Verdict receiver dropped");
                    }
                }
                Ok(Some(Command::Close(reason))) => {
                    session.close(reason);
                }
                Ok(None) => {
                    session.close(ClosureReason::Cancelled);
                }
                Err(_) => {
                    info!(
                        session_id = %session.id(),
                        idle_secs = idle_timeout.as_secs(),
                        "Session idle timeout"
                    );
                    session.close(ClosureReason::Idle);
                }
            }
        }
        inbox.close();
        GovernanceReporter::new().report(&session.snapshot())
    });

    PipelineHandle {
        session_id,
        commands,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use crate::session::SessionStatus;
    use persona::{seal, Axiom, PersonaSpec, Predicate};
    use std::sync::Arc;
    use std::time::Duration;

    fn session() -> PersonaSession {
        let spec = seal(
            PersonaSpec::new("assistant")
                .with_axiom(Axiom::new("not_human", "Never claim to be human", Predicate::forbids("i am human")))
                .with_primitive_budget(2),
        )
        .unwrap();
        PersonaSession::new(None, Arc::new(spec), &GuardConfig::default()).unwrap()
    }

    fn closure_reason(report: &Report) -> Option<ClosureReason> {
        match &report.status {
            SessionStatus::Closed { reason, .. } => Some(reason.clone()),
            SessionStatus::Open => None,
        }
    }

    #[tokio::test]
    async fn test_turns_evaluated_in_order() {
        let pipeline = spawn_pipeline(session(), &SessionConfig::default());

        assert!(pipeline.submit(Turn::new(1, "q", "Hello.")).await.unwrap().passed);
        assert!(pipeline.submit(Turn::new(2, "q", "Hi again.")).await.unwrap().passed);
        assert!(matches!(
            pipeline.submit(Turn::new(2, "q", "Duplicate.")).await,
            Err(GuardError::OutOfOrderWrite { tail: 2, got: 2 })
        ));

        let report = pipeline.close(ClosureReason::Operator).await.unwrap();
        assert_eq!(report.turns_evaluated, 2);
        assert_eq!(closure_reason(&report), Some(ClosureReason::Operator));
    }

    #[tokio::test]
    async fn test_breach_ends_pipeline() {
        let pipeline = spawn_pipeline(session(), &SessionConfig::default());

        let err = pipeline.submit(Turn::new(1, "q", "I am human.")).await.unwrap_err();
        assert!(matches!(err, GuardError::IdentityBreach { .. }));

        let err = pipeline.submit(Turn::new(2, "q", "Hello.")).await.unwrap_err();
        assert!(matches!(err, GuardError::SessionClosed(_)));

        let report = pipeline.wait().await.unwrap();
        assert!(matches!(closure_reason(&report), Some(ClosureReason::IdentityBreach { turn: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes_session() {
        let config = SessionConfig {
            idle_timeout_secs: 60,
            ..SessionConfig::default()
        };
        let pipeline = spawn_pipeline(session(), &config);
        pipeline.submit(Turn::new(1, "q", "Hello.")).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!pipeline.is_closed());

        let report = pipeline.wait().await.unwrap();
        assert_eq!(closure_reason(&report), Some(ClosureReason::Idle));
        assert_eq!(report.turns_evaluated, 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_cancels_session() {
        let PipelineHandle { commands, task, .. } = spawn_pipeline(session(), &SessionConfig::default());
        drop(commands);

        let report = task.await.unwrap();
        assert_eq!(closure_reason(&report), Some(ClosureReason::Cancelled));
    }
}
