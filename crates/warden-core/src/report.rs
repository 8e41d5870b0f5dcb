//! Unified reporting
//!
//! Pure aggregation over workflow rows: no I/O, no clock. A report is fully
//! determined by the workflow it summarizes.

use serde::{Deserialize, Serialize};

use crate::result::RedFlag;
use crate::stage::{Stage, TestType, WorkflowStatus};
use crate::workflow::Workflow;

/// Reviewer-facing recommendation for a test result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    ManualReview,
    Reject,
}

/// Per-stage summary line in a test report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub duration_ms: u64,
    pub success: bool,
}

/// Aggregated report for a single workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub test_id: String,
    pub epic_id: String,
    pub test_type: TestType,

    pub passed: bool,

    /// Verification confidence when present, otherwise 0
    pub confidence: f64,

    pub summary: String,
    pub recommendation: Recommendation,

    pub evidence_paths: Vec<String>,
    pub red_flags: Vec<RedFlag>,
    pub fixes_applied: u32,
    pub learnings_extracted: u32,

    pub duration_ms: u64,
    pub stages: Vec<StageSummary>,
}

/// Aggregated report for all workflows of an epic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpicTestReport {
    pub epic_id: String,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub escalated_tests: u32,
    pub average_confidence: f64,
    pub recommendation: Recommendation,
    pub test_reports: Vec<TestReport>,
}

/// Build the report for one workflow
pub fn report(workflow: &Workflow) -> TestReport {
    let verified = workflow
        .verification_result
        .as_ref()
        .map(|v| v.verified)
        .unwrap_or(false);
    let confidence = workflow
        .verification_result
        .as_ref()
        .map(|v| v.confidence)
        .unwrap_or(0.0);

    let passed = verified && workflow.status != WorkflowStatus::Failed;

    let recommendation = if passed && confidence >= 90.0 {
        Recommendation::Accept
    } else if !passed && !workflow.escalated {
        Recommendation::Reject
    } else {
        Recommendation::ManualReview
    };

    let evidence_paths = workflow
        .execution_result
        .as_ref()
        .map(|e| e.evidence.paths())
        .unwrap_or_default();

    let red_flags = workflow
        .detection_result
        .as_ref()
        .map(|d| d.red_flags.clone())
        .unwrap_or_default();

    let fixes_applied = workflow
        .fixing_result
        .as_ref()
        .map(|f| u32::from(f.success))
        .unwrap_or(0);

    let learnings_extracted = workflow
        .learning_result
        .as_ref()
        .map(|l| l.patterns.len() as u32)
        .unwrap_or(0);

    let stages = workflow
        .completed_stages()
        .into_iter()
        .map(|stage| StageSummary {
            stage,
            duration_ms: match stage {
                Stage::Execution => workflow
                    .execution_result
                    .as_ref()
                    .map(|e| e.duration_ms)
                    .unwrap_or(0),
                _ => 0,
            },
            success: true,
        })
        .collect();

    let summary = summarize(workflow, passed, confidence, &red_flags, fixes_applied);

    TestReport {
        test_id: workflow.test_id.clone(),
        epic_id: workflow.epic_id.clone(),
        test_type: workflow.test_type,
        passed,
        confidence,
        summary,
        recommendation,
        evidence_paths,
        red_flags,
        fixes_applied,
        learnings_extracted,
        duration_ms: workflow.duration_ms().unwrap_or(0),
        stages,
    }
}

fn summarize(
    workflow: &Workflow,
    passed: bool,
    confidence: f64,
    red_flags: &[RedFlag],
    fixes_applied: u32,
) -> String {
    let verdict = if passed { "passed" } else { "failed" };
    let mut summary = format!(
        "Test {} ({}) {verdict} with {confidence:.0}% confidence; {} red flag(s); {fixes_applied} fix(es) applied",
        workflow.test_id, workflow.test_type, red_flags.len()
    );
    if workflow.escalated {
        summary.push_str("; escalated for manual attention");
    }
    if let Some(error) = &workflow.error_message {
        summary.push_str(&format!("; error: {error}"));
    }
    summary
}

/// Build the collective report for an epic
pub fn epic_report(epic_id: &str, workflows: &[Workflow]) -> EpicTestReport {
    let test_reports: Vec<TestReport> = workflows.iter().map(report).collect();

    let total_tests = test_reports.len() as u32;
    let passed_tests = test_reports.iter().filter(|r| r.passed).count() as u32;
    let failed_tests = total_tests - passed_tests;
    let escalated_tests = workflows.iter().filter(|w| w.escalated).count() as u32;

    let average_confidence = if test_reports.is_empty() {
        0.0
    } else {
        test_reports.iter().map(|r| r.confidence).sum::<f64>() / test_reports.len() as f64
    };

    let any_failed_unescalated = workflows
        .iter()
        .any(|w| w.status == WorkflowStatus::Failed && !w.escalated);

    let recommendation = if total_tests > 0 && passed_tests == total_tests {
        Recommendation::Accept
    } else if failed_tests > 0 && any_failed_unescalated && escalated_tests == 0 {
        Recommendation::Reject
    } else {
        Recommendation::ManualReview
    };

    EpicTestReport {
        epic_id: epic_id.to_string(),
        total_tests,
        passed_tests,
        failed_tests,
        escalated_tests,
        average_confidence,
        recommendation,
        test_reports,
    }
}
