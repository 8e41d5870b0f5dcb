//! Workflow state machine service
//!
//! Owns every mutation of a workflow row: validated stage transitions,
//! stage-result storage, retry counting, and the escalation flag. All
//! writes go through the store's version check, so two racing writers on
//! the same workflow resolve to one winner and one `Conflict`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use warden_core::error::KernelError;
use warden_core::result::StageResult;
use warden_core::stage::{Stage, WorkflowStatus};
use warden_core::workflow::{TestDefinition, Workflow, WorkflowTransition};
use warden_storage::{KernelStore, ResultHistoryEntry};

/// Validated state machine over workflow rows
pub struct WorkflowStateMachine<S: KernelStore> {
    store: Arc<S>,
}

impl<S: KernelStore> WorkflowStateMachine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create a workflow in `pending`
    #[instrument(skip(self, definition), fields(test_id = %definition.test_id))]
    pub async fn create(&self, definition: &TestDefinition) -> Result<Workflow, KernelError> {
        let workflow = Workflow::new(definition);
        self.store.insert_workflow(workflow.clone()).await?;
        info!(workflow_id = %workflow.id, "workflow created");
        Ok(workflow)
    }

    /// Fetch a workflow by id
    pub async fn get(&self, workflow_id: Uuid) -> Result<Workflow, KernelError> {
        Ok(self.store.get_workflow(workflow_id).await?)
    }

    /// All workflows belonging to an epic
    pub async fn list_by_epic(&self, epic_id: &str) -> Result<Vec<Workflow>, KernelError> {
        Ok(self.store.list_workflows_by_epic(epic_id).await?)
    }

    /// Transition history for a workflow
    pub async fn transitions(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowTransition>, KernelError> {
        Ok(self.store.list_transitions(workflow_id).await?)
    }

    /// Stage-result write history for a workflow
    pub async fn result_history(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<ResultHistoryEntry>, KernelError> {
        Ok(self.store.list_result_history(workflow_id).await?)
    }

    /// Move a workflow to `to_stage` if the transition table allows it
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        workflow_id: Uuid,
        to_stage: Stage,
        reason: &str,
    ) -> Result<Workflow, KernelError> {
        let mut workflow = self.store.get_workflow(workflow_id).await?;
        let from_stage = workflow.current_stage;

        if !from_stage.can_transition_to(to_stage) {
            return Err(KernelError::InvalidTransition {
                from: from_stage.to_string(),
                to: to_stage.to_string(),
            });
        }

        // Leaving a producing stage forward requires its result on record
        if to_stage != Stage::Failed && from_stage.is_executable() {
            let stored = match from_stage {
                Stage::Execution => workflow.execution_result.is_some(),
                Stage::Detection => workflow.detection_result.is_some(),
                Stage::Verification => workflow.verification_result.is_some(),
                Stage::Fixing => workflow.fixing_result.is_some(),
                Stage::Learning => workflow.learning_result.is_some(),
                _ => true,
            };
            if !stored {
                return Err(KernelError::Validation(format!(
                    "cannot leave stage {from_stage} before its result is stored"
                )));
            }
        }

        workflow.current_stage = to_stage;
        workflow.status = WorkflowStatus::for_stage(to_stage);
        if to_stage.is_terminal() {
            workflow.completed_at = Some(Utc::now());
        }

        let expected_version = workflow.version;
        let updated = self.store.update_workflow(&workflow, expected_version).await?;

        self.store
            .append_transition(WorkflowTransition {
                workflow_id,
                from_stage,
                to_stage,
                timestamp: Utc::now(),
                reason: reason.to_string(),
            })
            .await?;

        debug!(%workflow_id, %from_stage, %to_stage, "workflow transitioned");
        Ok(updated)
    }

    /// Store a stage result into its slot
    ///
    /// The result's tag must match the workflow's current stage; storing a
    /// result for any other stage is a validation error.
    #[instrument(skip(self, result), fields(stage = %result.stage()))]
    pub async fn store_result(
        &self,
        workflow_id: Uuid,
        result: StageResult,
    ) -> Result<Workflow, KernelError> {
        let mut workflow = self.store.get_workflow(workflow_id).await?;

        if workflow.current_stage != result.stage() {
            return Err(KernelError::Validation(format!(
                "cannot store {} result while workflow is in stage {}",
                result.stage(),
                workflow.current_stage
            )));
        }

        let history = ResultHistoryEntry {
            workflow_id,
            stage: result.stage(),
            result: serde_json::to_value(&result)
                .map_err(|e| KernelError::Validation(e.to_string()))?,
            timestamp: Utc::now(),
        };

        match result {
            StageResult::Execution(r) => workflow.execution_result = Some(r),
            StageResult::Detection(r) => workflow.detection_result = Some(r),
            StageResult::Verification(r) => workflow.verification_result = Some(r),
            StageResult::Fixing(r) => workflow.fixing_result = Some(r),
            StageResult::Learning(r) => workflow.learning_result = Some(r),
        }

        let expected_version = workflow.version;
        let updated = self.store.update_workflow(&workflow, expected_version).await?;
        self.store.append_result_history(history).await?;
        Ok(updated)
    }

    /// Transition into `completed`
    pub async fn complete(&self, workflow_id: Uuid) -> Result<Workflow, KernelError> {
        self.transition(workflow_id, Stage::Completed, "pipeline finished")
            .await
    }

    /// Fail a workflow from any non-terminal stage
    #[instrument(skip(self))]
    pub async fn fail(
        &self,
        workflow_id: Uuid,
        error_message: &str,
    ) -> Result<Workflow, KernelError> {
        let mut workflow = self.store.get_workflow(workflow_id).await?;
        let from_stage = workflow.current_stage;

        if from_stage.is_terminal() {
            return Err(KernelError::InvalidTransition {
                from: from_stage.to_string(),
                to: Stage::Failed.to_string(),
            });
        }

        workflow.current_stage = Stage::Failed;
        workflow.status = WorkflowStatus::Failed;
        workflow.error_message = Some(error_message.to_string());
        workflow.completed_at = Some(Utc::now());

        let expected_version = workflow.version;
        let updated = self.store.update_workflow(&workflow, expected_version).await?;

        self.store
            .append_transition(WorkflowTransition {
                workflow_id,
                from_stage,
                to_stage: Stage::Failed,
                timestamp: Utc::now(),
                reason: error_message.to_string(),
            })
            .await?;

        info!(%workflow_id, %from_stage, "workflow failed");
        Ok(updated)
    }

    /// Atomic increment of the retry counter
    #[instrument(skip(self))]
    pub async fn increment_retry(&self, workflow_id: Uuid) -> Result<Workflow, KernelError> {
        let mut workflow = self.store.get_workflow(workflow_id).await?;
        workflow.retry_count += 1;
        let expected_version = workflow.version;
        Ok(self.store.update_workflow(&workflow, expected_version).await?)
    }

    /// Set the escalation flag; does not itself transition
    ///
    /// Escalation implies eventual failure: a completed workflow can no
    /// longer be escalated.
    #[instrument(skip(self))]
    pub async fn escalate(&self, workflow_id: Uuid) -> Result<Workflow, KernelError> {
        let mut workflow = self.store.get_workflow(workflow_id).await?;

        if workflow.current_stage == Stage::Completed {
            return Err(KernelError::InvalidTransition {
                from: Stage::Completed.to_string(),
                to: "escalated".to_string(),
            });
        }

        workflow.escalated = true;
        let expected_version = workflow.version;
        let updated = self.store.update_workflow(&workflow, expected_version).await?;
        info!(%workflow_id, "workflow escalated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::result::{
        DetectionResult, Evidence, StageResult, TestExecutionResult, VerificationReport,
    };
    use warden_core::stage::TestType;
    use warden_storage::InMemoryKernelStore;

    fn machine() -> WorkflowStateMachine<InMemoryKernelStore> {
        WorkflowStateMachine::new(Arc::new(InMemoryKernelStore::new()))
    }

    fn execution_result() -> StageResult {
        StageResult::Execution(TestExecutionResult {
            test_id: "T1".into(),
            passed: true,
            duration_ms: 500,
            evidence: Evidence::default(),
        })
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let machine = machine();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();
        assert_eq!(workflow.current_stage, Stage::Pending);
        assert_eq!(workflow.status, WorkflowStatus::Pending);
    }

    #[tokio::test]
    async fn test_valid_transition_records_history() {
        let machine = machine();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();

        let updated = machine
            .transition(workflow.id, Stage::Execution, "starting")
            .await
            .unwrap();
        assert_eq!(updated.current_stage, Stage::Execution);
        assert_eq!(updated.status, WorkflowStatus::InProgress);

        let transitions = machine.transitions(workflow.id).await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from_stage, Stage::Pending);
        assert_eq!(transitions[0].to_stage, Stage::Execution);
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_row_unchanged() {
        let machine = machine();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Execution, "starting")
            .await
            .unwrap();

        let result = machine
            .transition(workflow.id, Stage::Verification, "skipping ahead")
            .await;
        assert!(matches!(result, Err(KernelError::InvalidTransition { .. })));

        let row = machine.get(workflow.id).await.unwrap();
        assert_eq!(row.current_stage, Stage::Execution);
        assert_eq!(machine.transitions(workflow.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_result_requires_matching_stage() {
        let machine = machine();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Execution, "starting")
            .await
            .unwrap();

        // Detection result while in execution: rejected
        let result = machine
            .store_result(
                workflow.id,
                StageResult::Detection(DetectionResult {
                    test_id: "T1".into(),
                    red_flags: vec![],
                    detected_at: Utc::now(),
                    total_checks: 1,
                    flagged_checks: 0,
                }),
            )
            .await;
        assert!(matches!(result, Err(KernelError::Validation(_))));

        let updated = machine
            .store_result(workflow.id, execution_result())
            .await
            .unwrap();
        assert!(updated.execution_result.is_some());

        let history = machine.result_history(workflow.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].stage, Stage::Execution);
    }

    #[tokio::test]
    async fn test_cannot_leave_producing_stage_without_result() {
        let machine = machine();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Execution, "starting")
            .await
            .unwrap();

        let result = machine
            .transition(workflow.id, Stage::Detection, "no result yet")
            .await;
        assert!(matches!(result, Err(KernelError::Validation(_))));

        // Failing out of the stage is still allowed
        machine.fail(workflow.id, "runner crashed").await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_from_any_non_terminal_stage() {
        let machine = machine();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Execution, "starting")
            .await
            .unwrap();

        let failed = machine.fail(workflow.id, "ETIMEDOUT").await.unwrap();
        assert_eq!(failed.current_stage, Stage::Failed);
        assert_eq!(failed.status, WorkflowStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("ETIMEDOUT"));
        assert!(failed.completed_at.is_some());

        // Terminal: failing again is invalid
        assert!(matches!(
            machine.fail(workflow.id, "again").await,
            Err(KernelError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_counter_increments() {
        let machine = machine();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();

        machine.increment_retry(workflow.id).await.unwrap();
        let updated = machine.increment_retry(workflow.id).await.unwrap();
        assert_eq!(updated.retry_count, 2);
    }

    #[tokio::test]
    async fn test_escalate_sets_flag_without_transition() {
        let machine = machine();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Execution, "starting")
            .await
            .unwrap();

        let escalated = machine.escalate(workflow.id).await.unwrap();
        assert!(escalated.escalated);
        assert_eq!(escalated.current_stage, Stage::Execution);
    }

    #[tokio::test]
    async fn test_escalate_rejected_after_completion() {
        let machine = machine();
        let workflow = machine
            .create(&TestDefinition::new("T1", "E1", TestType::Ui))
            .await
            .unwrap();

        // Drive to completed through the happy path
        machine
            .transition(workflow.id, Stage::Execution, "s")
            .await
            .unwrap();
        machine
            .store_result(workflow.id, execution_result())
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Detection, "s")
            .await
            .unwrap();
        machine
            .store_result(
                workflow.id,
                StageResult::Detection(DetectionResult {
                    test_id: "T1".into(),
                    red_flags: vec![],
                    detected_at: Utc::now(),
                    total_checks: 1,
                    flagged_checks: 0,
                }),
            )
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Verification, "s")
            .await
            .unwrap();
        machine
            .store_result(
                workflow.id,
                StageResult::Verification(VerificationReport {
                    verified: true,
                    confidence: 95.0,
                    concerns: vec![],
                    cross_validation_results: vec![],
                    verifier_id: "v".into(),
                }),
            )
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Learning, "s")
            .await
            .unwrap();
        machine
            .store_result(
                workflow.id,
                StageResult::Learning(warden_core::result::LearningResult {
                    test_id: "T1".into(),
                    patterns: vec![],
                    extracted_at: Utc::now(),
                }),
            )
            .await
            .unwrap();
        machine
            .transition(workflow.id, Stage::Completed, "s")
            .await
            .unwrap();

        assert!(matches!(
            machine.escalate(workflow.id).await,
            Err(KernelError::InvalidTransition { .. })
        ));
    }
}
