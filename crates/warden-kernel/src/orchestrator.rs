//! Workflow orchestrator
//!
//! Drives one workflow through the pipeline as an explicit loop over
//! stages: transition in, execute, store the result, route to the next
//! stage. Failures go through the error handler (retry or escalate);
//! verification failures route into the fix loop. Every boundary emits its
//! events and every stage attempt lands in the command log.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use warden_core::command::{CommandType, NewCommandEntry};
use warden_core::config::KernelConfig;
use warden_core::error::KernelError;
use warden_core::event::EventType;
use warden_core::report::{report, TestReport};
use warden_core::result::PreviousResults;
use warden_core::stage::Stage;
use warden_core::workflow::{TestDefinition, Workflow};
use warden_storage::KernelStore;

use crate::collaborators::StageContext;
use crate::commands::CommandLogService;
use crate::errors::{ErrorDecision, ErrorHandler};
use crate::events::EventService;
use crate::executor::{StageExecutor, StageOutcome};
use crate::machine::WorkflowStateMachine;

/// Error literal for a breached overall workflow budget
pub const WORKFLOW_TIMEOUT_ERROR: &str = "workflow_timeout";

/// Final outcome of a workflow run
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub workflow: Workflow,
    pub report: TestReport,
    pub handoff_path: Option<String>,
}

/// Drives workflows through the staged pipeline
pub struct WorkflowOrchestrator<S: KernelStore> {
    machine: Arc<WorkflowStateMachine<S>>,
    executor: Arc<StageExecutor>,
    error_handler: Arc<ErrorHandler<S>>,
    events: Arc<EventService<S>>,
    commands: Arc<CommandLogService<S>>,
    config: KernelConfig,
}

impl<S: KernelStore> WorkflowOrchestrator<S> {
    pub fn new(
        machine: Arc<WorkflowStateMachine<S>>,
        executor: Arc<StageExecutor>,
        error_handler: Arc<ErrorHandler<S>>,
        events: Arc<EventService<S>>,
        commands: Arc<CommandLogService<S>>,
        config: KernelConfig,
    ) -> Self {
        Self {
            machine,
            executor,
            error_handler,
            events,
            commands,
            config,
        }
    }

    /// Run one test definition to a terminal state
    ///
    /// `instance_id` is the supervising instance whose event log receives
    /// the workflow's lifecycle events.
    #[instrument(skip(self, definition, cancel), fields(test_id = %definition.test_id))]
    pub async fn run(
        &self,
        instance_id: &str,
        definition: TestDefinition,
        cancel: CancellationToken,
    ) -> Result<WorkflowResult, KernelError> {
        let workflow = self.machine.create(&definition).await?;
        let workflow_id = workflow.id;

        self.events
            .append(
                instance_id,
                EventType::EpicStarted,
                json!({"epic_id": definition.epic_id, "test_id": definition.test_id}),
                None,
            )
            .await?;

        let deadline = Instant::now() + self.config.stage_timeouts.overall_workflow_timeout();
        let mut stage = Stage::Execution;
        let mut fix_cycles: u32 = 0;
        let mut skip_transition = false;

        loop {
            if !skip_transition {
                self.machine
                    .transition(workflow_id, stage, &format!("entering {stage}"))
                    .await?;
            }
            skip_transition = false;

            if stage == Stage::Execution {
                self.events
                    .append(
                        instance_id,
                        EventType::TestStarted,
                        json!({"test_id": definition.test_id}),
                        None,
                    )
                    .await?;
            }

            // Run the stage, retrying in place while the error handler asks
            let outcome = loop {
                if Instant::now() >= deadline {
                    return self
                        .fail_with_timeout(instance_id, workflow_id, &definition, stage)
                        .await;
                }

                let context = self.stage_context(workflow_id, &definition).await?;
                let outcome = self.executor.execute(stage, &context, &cancel).await;
                self.log_stage_attempt(instance_id, workflow_id, stage, &outcome)
                    .await?;

                if outcome.success {
                    break outcome;
                }

                let error_message = outcome.error.as_deref().unwrap_or("unknown error");
                match self.error_handler.handle(workflow_id, error_message).await? {
                    ErrorDecision::Retry { attempt, delay } => {
                        info!(%workflow_id, %stage, attempt, "re-running stage after retryable failure");
                        tokio::time::sleep(delay).await;
                    }
                    ErrorDecision::Escalated {
                        workflow,
                        handoff_path,
                        ..
                    } => {
                        self.emit_terminal_failure(instance_id, &definition, stage, &workflow)
                            .await?;
                        return Ok(WorkflowResult {
                            report: report(&workflow),
                            workflow,
                            handoff_path: Some(handoff_path),
                        });
                    }
                    ErrorDecision::Cancelled { workflow } => {
                        self.emit_terminal_failure(instance_id, &definition, stage, &workflow)
                            .await?;
                        return Ok(WorkflowResult {
                            report: report(&workflow),
                            workflow,
                            handoff_path: None,
                        });
                    }
                }
            };

            let data = outcome.data.ok_or_else(|| {
                KernelError::Validation(format!("stage {stage} succeeded without a result"))
            })?;
            let updated = self.machine.store_result(workflow_id, data).await?;

            stage = match stage {
                Stage::Execution => {
                    let passed = updated
                        .execution_result
                        .as_ref()
                        .map(|e| e.passed)
                        .unwrap_or(false);
                    let event_type = if passed {
                        EventType::TestPassed
                    } else {
                        EventType::TestFailed
                    };
                    self.events
                        .append(
                            instance_id,
                            event_type,
                            json!({"test_id": definition.test_id}),
                            None,
                        )
                        .await?;
                    Stage::Detection
                }

                Stage::Detection => Stage::Verification,

                Stage::Verification => {
                    let verification = updated.verification_result.clone().ok_or_else(|| {
                        KernelError::Validation("verification result missing after store".into())
                    })?;

                    let event_type = if verification.verified {
                        EventType::ValidationPassed
                    } else {
                        EventType::ValidationFailed
                    };
                    self.events
                        .append(
                            instance_id,
                            event_type,
                            json!({
                                "test_id": definition.test_id,
                                "confidence": verification.confidence,
                            }),
                            None,
                        )
                        .await?;

                    if verification.verified {
                        Stage::Learning
                    } else if updated.retry_count < self.config.max_retries
                        && fix_cycles < self.config.max_retries
                    {
                        fix_cycles += 1;
                        Stage::Fixing
                    } else {
                        let message = format!(
                            "verification failed with confidence {:.0} after {fix_cycles} fix cycle(s)",
                            verification.confidence
                        );
                        return self
                            .escalate_terminal(instance_id, workflow_id, &definition, stage, &message)
                            .await;
                    }
                }

                Stage::Fixing => {
                    let fix = updated.fixing_result.clone().ok_or_else(|| {
                        KernelError::Validation("fixing result missing after store".into())
                    })?;
                    if fix.success {
                        Stage::Verification
                    } else {
                        let message =
                            format!("fix attempt failed (strategy: {})", fix.fix_strategy);
                        match self.error_handler.handle(workflow_id, &message).await? {
                            ErrorDecision::Retry { delay, .. } => {
                                // A transient fix failure re-runs fixing in place
                                tokio::time::sleep(delay).await;
                                skip_transition = true;
                                Stage::Fixing
                            }
                            ErrorDecision::Escalated {
                                workflow,
                                handoff_path,
                                ..
                            } => {
                                self.emit_terminal_failure(
                                    instance_id,
                                    &definition,
                                    stage,
                                    &workflow,
                                )
                                .await?;
                                return Ok(WorkflowResult {
                                    report: report(&workflow),
                                    workflow,
                                    handoff_path: Some(handoff_path),
                                });
                            }
                            ErrorDecision::Cancelled { workflow } => {
                                self.emit_terminal_failure(
                                    instance_id,
                                    &definition,
                                    stage,
                                    &workflow,
                                )
                                .await?;
                                return Ok(WorkflowResult {
                                    report: report(&workflow),
                                    workflow,
                                    handoff_path: None,
                                });
                            }
                        }
                    }
                }

                Stage::Learning => {
                    let completed = self.machine.complete(workflow_id).await?;
                    self.events
                        .append(
                            instance_id,
                            EventType::EpicCompleted,
                            json!({"epic_id": definition.epic_id, "test_id": definition.test_id}),
                            None,
                        )
                        .await?;
                    info!(%workflow_id, "workflow completed");
                    return Ok(WorkflowResult {
                        report: report(&completed),
                        workflow: completed,
                        handoff_path: None,
                    });
                }

                other => {
                    return Err(KernelError::Validation(format!(
                        "orchestrator reached unexpected stage {other}"
                    )))
                }
            };
        }
    }

    /// Build the stage context from the current workflow row
    async fn stage_context(
        &self,
        workflow_id: Uuid,
        definition: &TestDefinition,
    ) -> Result<StageContext, KernelError> {
        let workflow = self.machine.get(workflow_id).await?;
        let previous_results = PreviousResults {
            execution: workflow.execution_result.clone(),
            detection: workflow.detection_result.clone(),
            verification: workflow.verification_result.clone(),
            fixing: workflow.fixing_result.clone(),
            learning: workflow.learning_result.clone(),
        };
        Ok(StageContext {
            workflow,
            test_definition: definition.clone(),
            previous_results,
        })
    }

    async fn log_stage_attempt(
        &self,
        instance_id: &str,
        workflow_id: Uuid,
        stage: Stage,
        outcome: &StageOutcome,
    ) -> Result<(), KernelError> {
        let mut entry = NewCommandEntry::new(
            instance_id,
            CommandType::Auto,
            format!("stage_{stage}"),
            outcome.success,
        )
        .with_parameters(json!({
            "workflow_id": workflow_id,
            "stage": stage.to_string(),
            "attempt": outcome.retries_used + 1,
        }))
        .with_execution_time_ms(outcome.duration_ms)
        .with_tags(vec!["workflow".into()])
        .with_source("orchestrator");

        if let Some(error) = &outcome.error {
            entry = entry.with_error_message(error.clone());
        }

        self.commands.log(entry).await?;
        Ok(())
    }

    async fn fail_with_timeout(
        &self,
        instance_id: &str,
        workflow_id: Uuid,
        definition: &TestDefinition,
        stage: Stage,
    ) -> Result<WorkflowResult, KernelError> {
        warn!(%workflow_id, "overall workflow timeout breached");
        let workflow = self
            .machine
            .fail(workflow_id, WORKFLOW_TIMEOUT_ERROR)
            .await?;
        self.emit_terminal_failure(instance_id, definition, stage, &workflow)
            .await?;
        Ok(WorkflowResult {
            report: report(&workflow),
            workflow,
            handoff_path: None,
        })
    }

    /// Escalate from a routing decision (not a stage error) and finish
    async fn escalate_terminal(
        &self,
        instance_id: &str,
        workflow_id: Uuid,
        definition: &TestDefinition,
        stage: Stage,
        message: &str,
    ) -> Result<WorkflowResult, KernelError> {
        match self.error_handler.escalate(workflow_id, message).await? {
            ErrorDecision::Escalated {
                workflow,
                handoff_path,
                ..
            } => {
                self.emit_terminal_failure(instance_id, definition, stage, &workflow)
                    .await?;
                Ok(WorkflowResult {
                    report: report(&workflow),
                    workflow,
                    handoff_path: Some(handoff_path),
                })
            }
            other => Err(KernelError::Validation(format!(
                "escalation produced unexpected decision {other:?}"
            ))),
        }
    }

    async fn emit_terminal_failure(
        &self,
        instance_id: &str,
        definition: &TestDefinition,
        stage: Stage,
        workflow: &Workflow,
    ) -> Result<(), KernelError> {
        if stage == Stage::Execution {
            self.events
                .append(
                    instance_id,
                    EventType::TestFailed,
                    json!({
                        "test_id": definition.test_id,
                        "error": workflow.error_message,
                    }),
                    None,
                )
                .await?;
        }
        self.events
            .append(
                instance_id,
                EventType::EpicFailed,
                json!({
                    "epic_id": definition.epic_id,
                    "test_id": definition.test_id,
                    "error": workflow.error_message,
                }),
                None,
            )
            .await?;
        Ok(())
    }
}
