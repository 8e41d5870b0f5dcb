//! Workflow stages and the allowed-transition table
//!
//! The pipeline is a fixed state machine:
//!
//! ```text
//! pending ──▶ execution ──▶ detection ──▶ verification ──▶ learning ──▶ completed
//!                │              │           │    ▲  │          │
//!                ▼              ▼           ▼    │  ▼          ▼
//!              failed         failed     fixing ─┘ failed    failed
//! ```
//!
//! `fixing` loops back into `verification` for re-verification after an
//! automated fix. Any non-terminal stage may move to `failed`.

use serde::{Deserialize, Serialize};

/// A stage in the test pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Workflow created but not started
    Pending,

    /// Running the test against its runner
    Execution,

    /// Scanning the evidence for red flags
    Detection,

    /// Independent verification of the result
    Verification,

    /// Automated fix attempt
    Fixing,

    /// Pattern extraction from the run
    Learning,

    /// Terminal: pipeline finished successfully
    Completed,

    /// Terminal: pipeline failed
    Failed,
}

impl Stage {
    /// Stages reachable from `self` in one transition
    pub fn allowed_transitions(&self) -> &'static [Stage] {
        match self {
            Self::Pending => &[Stage::Execution],
            Self::Execution => &[Stage::Detection, Stage::Failed],
            Self::Detection => &[Stage::Verification, Stage::Failed],
            Self::Verification => &[Stage::Fixing, Stage::Learning, Stage::Failed],
            Self::Fixing => &[Stage::Verification, Stage::Learning, Stage::Failed],
            Self::Learning => &[Stage::Completed, Stage::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    /// Whether `to` is a legal next stage
    pub fn can_transition_to(&self, to: Stage) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Terminal stages admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the stage runs an external collaborator
    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            Self::Execution | Self::Detection | Self::Verification | Self::Fixing | Self::Learning
        )
    }

    /// All stages, in pipeline order
    pub fn all() -> &'static [Stage] {
        &[
            Stage::Pending,
            Stage::Execution,
            Stage::Detection,
            Stage::Verification,
            Stage::Fixing,
            Stage::Learning,
            Stage::Completed,
            Stage::Failed,
        ]
    }

    /// Parse from the snake_case wire/database form
    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "pending" => Some(Self::Pending),
            "execution" => Some(Self::Execution),
            "detection" => Some(Self::Detection),
            "verification" => Some(Self::Verification),
            "fixing" => Some(Self::Fixing),
            "learning" => Some(Self::Learning),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Execution => write!(f, "execution"),
            Self::Detection => write!(f, "detection"),
            Self::Verification => write!(f, "verification"),
            Self::Fixing => write!(f, "fixing"),
            Self::Learning => write!(f, "learning"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Coarse workflow status derived from the current stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Workflow created but not started
    Pending,

    /// Workflow is progressing through stages
    InProgress,

    /// Workflow completed successfully
    Completed,

    /// Workflow failed
    Failed,
}

impl WorkflowStatus {
    /// Status implied by a stage
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Pending => Self::Pending,
            Stage::Completed => Self::Completed,
            Stage::Failed => Self::Failed,
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Kind of test a workflow runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Ui,
    Api,
    Unit,
    Integration,
}

impl TestType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ui" => Some(Self::Ui),
            "api" => Some(Self::Api),
            "unit" => Some(Self::Unit),
            "integration" => Some(Self::Integration),
            _ => None,
        }
    }
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ui => write!(f, "ui"),
            Self::Api => write!(f, "api"),
            Self::Unit => write!(f, "unit"),
            Self::Integration => write!(f, "integration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Stage::Pending.can_transition_to(Stage::Execution));
        assert!(Stage::Execution.can_transition_to(Stage::Detection));
        assert!(Stage::Detection.can_transition_to(Stage::Verification));
        assert!(Stage::Verification.can_transition_to(Stage::Learning));
        assert!(Stage::Learning.can_transition_to(Stage::Completed));
    }

    #[test]
    fn test_fix_loop_transitions() {
        assert!(Stage::Verification.can_transition_to(Stage::Fixing));
        assert!(Stage::Fixing.can_transition_to(Stage::Verification));
        assert!(Stage::Fixing.can_transition_to(Stage::Learning));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Stage::Pending.can_transition_to(Stage::Verification));
        assert!(!Stage::Execution.can_transition_to(Stage::Verification));
        assert!(!Stage::Execution.can_transition_to(Stage::Completed));
        assert!(!Stage::Detection.can_transition_to(Stage::Fixing));
        assert!(!Stage::Learning.can_transition_to(Stage::Execution));
    }

    #[test]
    fn test_terminal_stages_have_no_exits() {
        assert!(Stage::Completed.allowed_transitions().is_empty());
        assert!(Stage::Failed.allowed_transitions().is_empty());
        assert!(Stage::Completed.is_terminal());
        assert!(Stage::Failed.is_terminal());
    }

    #[test]
    fn test_every_non_terminal_stage_can_fail() {
        for stage in [
            Stage::Execution,
            Stage::Detection,
            Stage::Verification,
            Stage::Fixing,
            Stage::Learning,
        ] {
            assert!(stage.can_transition_to(Stage::Failed), "{stage} -> failed");
        }
    }

    #[test]
    fn test_stage_roundtrip() {
        for stage in Stage::all() {
            assert_eq!(Stage::parse(&stage.to_string()), Some(*stage));
        }
        assert_eq!(Stage::parse("bogus"), None);
    }

    #[test]
    fn test_status_for_stage() {
        assert_eq!(WorkflowStatus::for_stage(Stage::Pending), WorkflowStatus::Pending);
        assert_eq!(
            WorkflowStatus::for_stage(Stage::Verification),
            WorkflowStatus::InProgress
        );
        assert_eq!(
            WorkflowStatus::for_stage(Stage::Completed),
            WorkflowStatus::Completed
        );
        assert_eq!(WorkflowStatus::for_stage(Stage::Failed), WorkflowStatus::Failed);
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&Stage::Verification).unwrap();
        assert_eq!(json, "\"verification\"");
        let json = serde_json::to_string(&WorkflowStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let json = serde_json::to_string(&TestType::Integration).unwrap();
        assert_eq!(json, "\"integration\"");
    }
}
