//! Stage executor
//!
//! One uniform entry point runs any executable stage against its
//! collaborator, under the stage's timeout and the workflow's cancellation
//! token. Results are returned, never persisted here; the orchestrator
//! stores them only on full stage success.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use warden_core::config::StageTimeouts;
use warden_core::result::{DetectionResult, StageResult};
use warden_core::stage::Stage;

use crate::collaborators::{CollaboratorError, Collaborators, StageContext};

/// Error literal for a timed-out stage
pub const TIMEOUT_ERROR: &str = "timeout";

/// Error literal for a cancelled stage
pub const CANCELLED_ERROR: &str = "cancelled";

/// Outcome of one stage execution attempt
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub success: bool,
    pub data: Option<StageResult>,
    pub error: Option<String>,
    pub retries_used: u32,
    pub duration_ms: u64,
}

impl StageOutcome {
    fn ok(data: StageResult, retries_used: u32, duration_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            retries_used,
            duration_ms,
        }
    }

    fn err(error: impl Into<String>, retries_used: u32, duration_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            retries_used,
            duration_ms,
        }
    }
}

/// Runs a single stage with timeout and cooperative cancellation
pub struct StageExecutor {
    collaborators: Collaborators,
    timeouts: StageTimeouts,
}

impl StageExecutor {
    pub fn new(collaborators: Collaborators, timeouts: StageTimeouts) -> Self {
        Self {
            collaborators,
            timeouts,
        }
    }

    /// Execute `stage` against its collaborator
    ///
    /// On timeout the collaborator future is dropped (best-effort cancel)
    /// and the outcome carries `error = "timeout"`. On cancellation the
    /// outcome carries `error = "cancelled"`.
    #[instrument(skip(self, context, cancel), fields(workflow_id = %context.workflow.id))]
    pub async fn execute(
        &self,
        stage: Stage,
        context: &StageContext,
        cancel: &CancellationToken,
    ) -> StageOutcome {
        let retries_used = context.workflow.retry_count;
        let started = Instant::now();

        let Some(timeout) = self.timeouts.for_stage(stage) else {
            return StageOutcome::err(
                format!("stage {stage} is not executable"),
                retries_used,
                0,
            );
        };

        let work = self.invoke(stage, context);

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(%stage, "stage cancelled");
                return StageOutcome::err(
                    CANCELLED_ERROR,
                    retries_used,
                    started.elapsed().as_millis() as u64,
                );
            }
            outcome = tokio::time::timeout(timeout, work) => outcome,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(data)) => {
                debug!(%stage, duration_ms, "stage succeeded");
                StageOutcome::ok(data, retries_used, duration_ms)
            }
            Ok(Err(error)) => {
                warn!(%stage, %error, "stage failed");
                StageOutcome::err(error.to_string(), retries_used, duration_ms)
            }
            Err(_) => {
                warn!(%stage, ?timeout, "stage timed out");
                StageOutcome::err(TIMEOUT_ERROR, retries_used, duration_ms)
            }
        }
    }

    async fn invoke(
        &self,
        stage: Stage,
        context: &StageContext,
    ) -> Result<StageResult, CollaboratorError> {
        let previous = &context.previous_results;
        match stage {
            Stage::Execution => {
                let result = self
                    .collaborators
                    .runner
                    .run(&context.test_definition)
                    .await?;
                Ok(StageResult::Execution(result))
            }
            Stage::Detection => {
                let evidence = previous
                    .execution
                    .as_ref()
                    .map(|e| e.evidence.clone())
                    .unwrap_or_default();
                let result = self
                    .collaborators
                    .detector
                    .analyze(&evidence, &context.test_definition)
                    .await?;
                Ok(StageResult::Detection(result))
            }
            Stage::Verification => {
                let evidence = previous
                    .execution
                    .as_ref()
                    .map(|e| e.evidence.clone())
                    .unwrap_or_default();
                let detection = previous.detection.clone().unwrap_or_else(|| {
                    empty_detection(&context.test_definition.test_id)
                });
                let result = self
                    .collaborators
                    .verifier
                    .verify(&evidence, &detection)
                    .await?;
                Ok(StageResult::Verification(result))
            }
            Stage::Fixing => {
                let verification = previous.verification.clone().ok_or_else(|| {
                    CollaboratorError::from("fixing requires a verification report")
                })?;
                let evidence = previous
                    .execution
                    .as_ref()
                    .map(|e| e.evidence.clone())
                    .unwrap_or_default();
                let result = self
                    .collaborators
                    .fixer
                    .attempt(&verification, &evidence)
                    .await?;
                Ok(StageResult::Fixing(result))
            }
            Stage::Learning => {
                let result = self.collaborators.learner.extract(context).await?;
                Ok(StageResult::Learning(result))
            }
            other => Err(CollaboratorError(format!("stage {other} is not executable"))),
        }
    }
}

fn empty_detection(test_id: &str) -> DetectionResult {
    DetectionResult {
        test_id: test_id.to_string(),
        red_flags: vec![],
        detected_at: chrono::Utc::now(),
        total_checks: 0,
        flagged_checks: 0,
    }
}
