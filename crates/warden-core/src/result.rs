//! Stage result payloads
//!
//! Each pipeline stage produces a structured result. The results travel
//! between stages as tagged variants of [`StageResult`] so a result can only
//! be stored into the slot of the stage that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// Evidence collected during test execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Paths to captured screenshots
    #[serde(default)]
    pub screenshots: Vec<String>,

    /// Paths to captured log files
    #[serde(default)]
    pub logs: Vec<String>,

    /// Paths to captured traces (network, browser, etc.)
    #[serde(default)]
    pub traces: Vec<String>,
}

impl Evidence {
    /// All evidence paths in one list, screenshots first
    pub fn paths(&self) -> Vec<String> {
        self.screenshots
            .iter()
            .chain(self.logs.iter())
            .chain(self.traces.iter())
            .cloned()
            .collect()
    }
}

/// Result of the `execution` stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestExecutionResult {
    pub test_id: String,
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub evidence: Evidence,
}

/// An anomaly spotted in the evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedFlag {
    /// Short category, e.g. "console_error", "premature_success"
    pub flag_type: String,

    /// Human-readable description
    pub description: String,

    /// Severity in [0, 100]
    pub severity: u8,

    /// Where in the evidence the flag was raised
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Result of the `detection` stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub test_id: String,
    #[serde(default)]
    pub red_flags: Vec<RedFlag>,
    pub detected_at: DateTime<Utc>,
    pub total_checks: u32,
    pub flagged_checks: u32,
}

impl DetectionResult {
    pub fn is_clean(&self) -> bool {
        self.red_flags.is_empty()
    }
}

/// A cross-validation performed by the independent verifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub check: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of the `verification` stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verified: bool,

    /// Verifier confidence in [0, 100]
    pub confidence: f64,

    #[serde(default)]
    pub concerns: Vec<String>,

    #[serde(default)]
    pub cross_validation_results: Vec<CrossValidation>,

    pub verifier_id: String,
}

/// Result of the `fixing` stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixResult {
    pub success: bool,
    pub fix_strategy: String,
    pub retries_used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// A pattern extracted by the learning stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Pattern category, e.g. "success", "red_flag", "fix_strategy"
    pub pattern_type: String,

    /// Confidence in [0, 100]
    pub confidence: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of the `learning` stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningResult {
    pub test_id: String,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    pub extracted_at: DateTime<Utc>,
}

/// A stage result, tagged by the producing stage
///
/// The tag makes the payload self-describing in storage and lets the state
/// machine reject a result stored against the wrong stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageResult {
    Execution(TestExecutionResult),
    Detection(DetectionResult),
    Verification(VerificationReport),
    Fixing(FixResult),
    Learning(LearningResult),
}

impl StageResult {
    /// The stage this result belongs to
    pub fn stage(&self) -> Stage {
        match self {
            Self::Execution(_) => Stage::Execution,
            Self::Detection(_) => Stage::Detection,
            Self::Verification(_) => Stage::Verification,
            Self::Fixing(_) => Stage::Fixing,
            Self::Learning(_) => Stage::Learning,
        }
    }

    pub fn as_execution(&self) -> Option<&TestExecutionResult> {
        match self {
            Self::Execution(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_detection(&self) -> Option<&DetectionResult> {
        match self {
            Self::Detection(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_verification(&self) -> Option<&VerificationReport> {
        match self {
            Self::Verification(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_fixing(&self) -> Option<&FixResult> {
        match self {
            Self::Fixing(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_learning(&self) -> Option<&LearningResult> {
        match self {
            Self::Learning(r) => Some(r),
            _ => None,
        }
    }
}

/// Results accumulated so far in a workflow, handed to later stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviousResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<TestExecutionResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixing: Option<FixResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning: Option<LearningResult>,
}

impl PreviousResults {
    /// Record a stage result into its slot
    pub fn record(&mut self, result: StageResult) {
        match result {
            StageResult::Execution(r) => self.execution = Some(r),
            StageResult::Detection(r) => self.detection = Some(r),
            StageResult::Verification(r) => self.verification = Some(r),
            StageResult::Fixing(r) => self.fixing = Some(r),
            StageResult::Learning(r) => self.learning = Some(r),
        }
    }
}
