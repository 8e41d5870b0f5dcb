//! Error handler
//!
//! Decides what happens when a stage fails: retry the same stage, or
//! escalate, fail the workflow, and emit a handoff. Retryability is
//! classified from the error text; the class list matches the transient
//! failures collaborators actually produce.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use regex::RegexSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use warden_core::error::KernelError;
use warden_core::workflow::Workflow;
use warden_storage::KernelStore;

use crate::executor::CANCELLED_ERROR;
use crate::handoff::{EscalationHandoff, HandoffSink};
use crate::machine::WorkflowStateMachine;

/// Patterns marking an error message as retryable
const RETRYABLE_PATTERNS: &[&str] = &[
    r"(?i)network",
    r"(?i)timeout",
    r"(?i)ECONNREFUSED",
    r"(?i)ETIMEDOUT",
    r"(?i)temporary",
    r"(?i)transient",
    r"(?i)rate limit",
];

/// What the orchestrator should do after a stage failure
#[derive(Debug, Clone)]
pub enum ErrorDecision {
    /// Re-run the same stage; the retry counter has been incremented
    Retry {
        attempt: u32,
        delay: Duration,
    },

    /// The workflow was escalated and failed; a handoff was written
    Escalated {
        workflow: Workflow,
        handoff_path: String,
        error_message: String,
    },

    /// Cancellation: the workflow was failed with no retry and no handoff
    Cancelled { workflow: Workflow },
}

/// Retry/escalation policy around the state machine
pub struct ErrorHandler<S: KernelStore> {
    machine: Arc<WorkflowStateMachine<S>>,
    sink: HandoffSink,
    retryable: RegexSet,
    max_retries: u32,
}

impl<S: KernelStore> ErrorHandler<S> {
    pub fn new(machine: Arc<WorkflowStateMachine<S>>, sink: HandoffSink, max_retries: u32) -> Self {
        // The pattern list is static and known-good; an empty set is the
        // (unreachable) fallback rather than a panic path.
        let retryable = RegexSet::new(RETRYABLE_PATTERNS)
            .unwrap_or_else(|_| RegexSet::empty());
        Self {
            machine,
            sink,
            retryable,
            max_retries,
        }
    }

    /// Whether an error message is worth retrying
    pub fn is_retryable(&self, error_message: &str) -> bool {
        self.retryable.is_match(error_message)
    }

    /// Exponential backoff with jitter before a retry
    ///
    /// 500ms base, doubling per attempt, capped at 30s, with 10% jitter to
    /// avoid retry alignment across parallel workflows.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = 0.5_f64 * 2.0_f64.powi(attempt.saturating_sub(1).min(10) as i32);
        let capped = base.min(30.0);
        let jitter = rand::thread_rng().gen_range(-0.1..0.1) * capped;
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }

    /// Handle a stage failure for a workflow
    ///
    /// Cancellation fails the workflow immediately. Retryable errors within
    /// budget increment the retry counter and ask the orchestrator to
    /// re-run the stage. Anything else escalates: flag, fail, handoff.
    #[instrument(skip(self), fields(%workflow_id))]
    pub async fn handle(
        &self,
        workflow_id: Uuid,
        error_message: &str,
    ) -> Result<ErrorDecision, KernelError> {
        if error_message == CANCELLED_ERROR {
            let workflow = self.machine.fail(workflow_id, CANCELLED_ERROR).await?;
            info!(%workflow_id, "workflow cancelled");
            return Ok(ErrorDecision::Cancelled { workflow });
        }

        let workflow = self.machine.get(workflow_id).await?;
        if self.is_retryable(error_message) && workflow.retry_count < self.max_retries {
            let updated = self.machine.increment_retry(workflow_id).await?;
            let delay = self.retry_delay(updated.retry_count);
            warn!(
                %workflow_id,
                attempt = updated.retry_count,
                %error_message,
                "retrying stage"
            );
            return Ok(ErrorDecision::Retry {
                attempt: updated.retry_count,
                delay,
            });
        }

        self.escalate(workflow_id, error_message).await
    }

    /// Escalate: set the flag, fail the workflow, write the handoff
    #[instrument(skip(self), fields(%workflow_id))]
    pub async fn escalate(
        &self,
        workflow_id: Uuid,
        error_message: &str,
    ) -> Result<ErrorDecision, KernelError> {
        self.machine.escalate(workflow_id).await?;

        let reason = format!(
            "Stage failed and the error was not recoverable automatically: {error_message}"
        );
        let escalated = self.machine.get(workflow_id).await?;
        let handoff = EscalationHandoff::for_workflow(&escalated, &reason);
        let handoff_path = self.sink.write(&handoff).await?;

        let final_message = format!("Escalated: {error_message} (handoff: {handoff_path})");
        let workflow = self.machine.fail(workflow_id, &final_message).await?;

        Ok(ErrorDecision::Escalated {
            workflow,
            handoff_path,
            error_message: final_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::stage::{Stage, TestType, WorkflowStatus};
    use warden_core::workflow::TestDefinition;
    use warden_storage::InMemoryKernelStore;

    fn handler() -> (
        ErrorHandler<InMemoryKernelStore>,
        Arc<WorkflowStateMachine<InMemoryKernelStore>>,
        std::path::PathBuf,
    ) {
        let machine = Arc::new(WorkflowStateMachine::new(Arc::new(
            InMemoryKernelStore::new(),
        )));
        let dir = std::env::temp_dir().join(format!(
            "warden-errors-test-{}",
            uuid::Uuid::now_v7().simple()
        ));
        (
            ErrorHandler::new(machine.clone(), HandoffSink::new(&dir), 3),
            machine,
            dir,
        )
    }

    #[test]
    fn test_retryable_classification() {
        let (handler, _, _) = handler();
        for message in [
            "connect ETIMEDOUT 10.0.0.1:443",
            "ECONNREFUSED",
            "Network unreachable",
            "upstream rate limit exceeded",
            "temporary failure in name resolution",
            "transient store error",
            "stage timeout",
        ] {
            assert!(handler.is_retryable(message), "{message} should retry");
        }
        for message in ["assertion failed", "selector not found", "invalid input"] {
            assert!(!handler.is_retryable(message), "{message} should not retry");
        }
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let (handler, _, _) = handler();
        let first = handler.retry_delay(1);
        assert!(first >= Duration::from_millis(400) && first <= Duration::from_millis(600));

        let late = handler.retry_delay(12);
        assert!(late <= Duration::from_secs(34));
    }

    #[tokio::test]
    async fn test_retryable_error_increments_and_signals_retry() {
        let (handler, machine, _) = handler();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Execution, "start")
            .await
            .unwrap();

        match handler.handle(workflow.id, "ETIMEDOUT").await.unwrap() {
            ErrorDecision::Retry { attempt, .. } => assert_eq!(attempt, 1),
            other => panic!("expected retry, got {other:?}"),
        }
        assert_eq!(machine.get(workflow.id).await.unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_escalate_with_handoff() {
        let (handler, machine, dir) = handler();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Execution, "start")
            .await
            .unwrap();

        for _ in 0..3 {
            machine.increment_retry(workflow.id).await.unwrap();
        }

        match handler.handle(workflow.id, "ETIMEDOUT").await.unwrap() {
            ErrorDecision::Escalated {
                workflow,
                handoff_path,
                error_message,
            } => {
                assert!(workflow.escalated);
                assert_eq!(workflow.status, WorkflowStatus::Failed);
                assert_eq!(workflow.retry_count, 3);
                assert!(error_message.contains(&handoff_path));
                assert!(handoff_path.ends_with("-T1-escalation.md"));
            }
            other => panic!("expected escalation, got {other:?}"),
        }

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_non_retryable_error_escalates_immediately() {
        let (handler, machine, dir) = handler();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Execution, "start")
            .await
            .unwrap();

        match handler.handle(workflow.id, "assertion failed").await.unwrap() {
            ErrorDecision::Escalated { workflow, .. } => {
                assert!(workflow.escalated);
                assert_eq!(workflow.retry_count, 0);
            }
            other => panic!("expected escalation, got {other:?}"),
        }

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_cancellation_fails_without_retry_or_handoff() {
        let (handler, machine, _) = handler();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Execution, "start")
            .await
            .unwrap();

        match handler.handle(workflow.id, CANCELLED_ERROR).await.unwrap() {
            ErrorDecision::Cancelled { workflow } => {
                assert_eq!(workflow.status, WorkflowStatus::Failed);
                assert_eq!(workflow.error_message.as_deref(), Some(CANCELLED_ERROR));
                assert!(!workflow.escalated);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
}
