//! Escalation handoff documents
//!
//! When a workflow escalates, the kernel renders a markdown handoff for a
//! human operator: what failed, why it escalated, and where each stage got
//! to. The filename embeds the timestamp and test id so handoffs sort
//! chronologically on disk.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, instrument};

use warden_core::error::KernelError;
use warden_core::stage::Stage;
use warden_core::workflow::Workflow;

/// A rendered escalation handoff
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationHandoff {
    pub filename: String,
    pub markdown: String,
    pub created_at: DateTime<Utc>,
}

impl EscalationHandoff {
    /// Build the handoff for an escalated workflow
    pub fn for_workflow(workflow: &Workflow, reason: &str) -> Self {
        let created_at = Utc::now();
        let filename = format!(
            "{}-{}-escalation.md",
            created_at.format("%Y-%m-%dT%H-%M-%S"),
            workflow.test_id
        );
        let markdown = render(workflow, reason, created_at);
        Self {
            filename,
            markdown,
            created_at,
        }
    }
}

fn render(workflow: &Workflow, reason: &str, created_at: DateTime<Utc>) -> String {
    let mut doc = String::new();

    doc.push_str(&format!(
        "# Escalation: {} ({})\n\n",
        workflow.test_id, workflow.epic_id
    ));

    doc.push_str("## Status\n\n");
    doc.push_str(&format!(
        "- Workflow: `{}`\n- Stage: `{}`\n- Status: `{}`\n- Retries used: {}\n- Escalated at: {}\n\n",
        workflow.id,
        workflow.current_stage,
        workflow.status,
        workflow.retry_count,
        created_at.to_rfc3339(),
    ));

    doc.push_str("## Reason for Escalation\n\n");
    doc.push_str(reason);
    doc.push_str("\n\n");

    doc.push_str("## Error Details\n\n");
    match &workflow.error_message {
        Some(error) => doc.push_str(&format!("```\n{error}\n```\n\n")),
        None => doc.push_str("_No error message recorded._\n\n"),
    }

    doc.push_str("## Workflow Progress\n\n");
    let stages: [(Stage, Option<Value>); 5] = [
        (
            Stage::Execution,
            workflow
                .execution_result
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok()),
        ),
        (
            Stage::Detection,
            workflow
                .detection_result
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok()),
        ),
        (
            Stage::Verification,
            workflow
                .verification_result
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok()),
        ),
        (
            Stage::Fixing,
            workflow
                .fixing_result
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok()),
        ),
        (
            Stage::Learning,
            workflow
                .learning_result
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok()),
        ),
    ];
    for (stage, result) in stages {
        match result {
            Some(value) => {
                doc.push_str(&format!(
                    "- [x] {stage}\n\n  ```json\n  {}\n  ```\n",
                    serde_json::to_string_pretty(&value)
                        .unwrap_or_else(|_| value.to_string())
                        .replace('\n', "\n  "),
                ));
            }
            None => doc.push_str(&format!("- [ ] {stage}\n")),
        }
    }
    doc.push('\n');

    doc.push_str("## Next Steps\n\n");
    doc.push_str(
        "1. Review the error details and the last completed stage above.\n\
         2. Reproduce the failing stage manually against the same test definition.\n\
         3. If the failure is environmental, re-run the workflow once the cause is cleared.\n\
         4. Otherwise update the test definition or the implicated component and re-run.\n",
    );

    doc
}

/// Writes handoffs to the configured directory
pub struct HandoffSink {
    dir: std::path::PathBuf,
}

impl HandoffSink {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persist the handoff; returns the path it was written to
    #[instrument(skip(self, handoff), fields(filename = %handoff.filename))]
    pub async fn write(&self, handoff: &EscalationHandoff) -> Result<String, KernelError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| KernelError::Unavailable(format!("cannot create handoff dir: {e}")))?;

        let path = self.dir.join(&handoff.filename);
        tokio::fs::write(&path, &handoff.markdown)
            .await
            .map_err(|e| KernelError::Unavailable(format!("cannot write handoff: {e}")))?;

        let path = path.to_string_lossy().into_owned();
        info!(%path, "escalation handoff written");
        Ok(path)
    }
}
