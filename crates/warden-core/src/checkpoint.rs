//! Work-state checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KernelError;

/// What triggered a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    /// Context window usage crossed the policy threshold
    ContextWindow,
    /// An epic completed
    EpicCompletion,
    /// Explicit operator request
    Manual,
}

impl CheckpointType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "context_window" => Some(Self::ContextWindow),
            "epic_completion" => Some(Self::EpicCompletion),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContextWindow => write!(f, "context_window"),
            Self::EpicCompletion => write!(f, "epic_completion"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A durable snapshot of an instance's work-state
///
/// Immutable after write. `sequence_num` pins the snapshot to a position in
/// the instance's event log so resume can replay only the tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: Uuid,
    pub instance_id: String,
    pub checkpoint_type: CheckpointType,

    /// Event sequence the snapshot corresponds to
    pub sequence_num: i64,

    pub timestamp: DateTime<Utc>,

    /// Context window usage in [0, 100]
    pub context_window_percent: f64,

    pub work_state: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Validate a context window percentage
pub fn validate_context_percent(percent: f64) -> Result<(), KernelError> {
    if !(0.0..=100.0).contains(&percent) || percent.is_nan() {
        return Err(KernelError::Validation(format!(
            "context_window_percent must be within [0, 100], got {percent}"
        )));
    }
    Ok(())
}

/// Where reconstructed work-state came from, ordered by confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconstructionSource {
    /// Latest checkpoint
    Checkpoint,
    /// Event replay from the last checkpoint
    Events,
    /// Heuristic over recent commands
    Commands,
    /// Registry row only
    Basic,
}

impl ReconstructionSource {
    /// Minimum confidence guaranteed by this source
    pub fn base_confidence(&self) -> f64 {
        match self {
            Self::Checkpoint => 0.9,
            Self::Events => 0.7,
            Self::Commands => 0.4,
            Self::Basic => 0.2,
        }
    }
}

/// Result of work-state reconstruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedState {
    pub work_state: serde_json::Value,
    pub source: ReconstructionSource,
    pub confidence: f64,
}
