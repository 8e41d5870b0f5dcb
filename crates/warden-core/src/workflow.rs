//! Workflow entity and transition records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::result::{
    DetectionResult, FixResult, LearningResult, TestExecutionResult, VerificationReport,
};
use crate::stage::{Stage, TestType, WorkflowStatus};

/// Definition of the test a workflow runs, derived from an epic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub test_id: String,
    pub epic_id: String,
    pub test_type: TestType,

    /// Free-form runner parameters (steps, selectors, endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl TestDefinition {
    pub fn new(
        test_id: impl Into<String>,
        epic_id: impl Into<String>,
        test_type: TestType,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            epic_id: epic_id.into(),
            test_type,
            parameters: None,
        }
    }
}

/// One test run through the pipeline
///
/// Created in `pending`, mutated only through state machine transitions.
/// Once `current_stage` is terminal, only `escalated` and `error_message`
/// may still change, and `escalated = true` implies `status = failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub test_id: String,
    pub epic_id: String,
    pub test_type: TestType,

    pub current_stage: Stage,
    pub status: WorkflowStatus,

    /// Per-stage result slots, filled as each stage completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<TestExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_result: Option<DetectionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_result: Option<VerificationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixing_result: Option<FixResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_result: Option<LearningResult>,

    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub escalated: bool,

    /// Optimistic concurrency version, bumped on every write
    pub version: i32,
}

impl Workflow {
    /// A fresh workflow in `pending`
    pub fn new(definition: &TestDefinition) -> Self {
        Self {
            id: Uuid::now_v7(),
            test_id: definition.test_id.clone(),
            epic_id: definition.epic_id.clone(),
            test_type: definition.test_type,
            current_stage: Stage::Pending,
            status: WorkflowStatus::Pending,
            execution_result: None,
            detection_result: None,
            verification_result: None,
            fixing_result: None,
            learning_result: None,
            started_at: Utc::now(),
            completed_at: None,
            retry_count: 0,
            error_message: None,
            escalated: false,
            version: 1,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.current_stage.is_terminal()
    }

    /// Wall-clock duration, defined once the workflow has completed
    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at.map(|end| {
            end.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64
        })
    }

    /// Which stages have a stored result, in pipeline order
    pub fn completed_stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        if self.execution_result.is_some() {
            stages.push(Stage::Execution);
        }
        if self.detection_result.is_some() {
            stages.push(Stage::Detection);
        }
        if self.verification_result.is_some() {
            stages.push(Stage::Verification);
        }
        if self.fixing_result.is_some() {
            stages.push(Stage::Fixing);
        }
        if self.learning_result.is_some() {
            stages.push(Stage::Learning);
        }
        stages
    }
}

/// Audit record of one stage transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTransition {
    pub workflow_id: Uuid,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}
