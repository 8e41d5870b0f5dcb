//! Database row models (internal, converted to domain types at the boundary)

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use warden_core::checkpoint::{Checkpoint, CheckpointType};
use warden_core::command::{CommandEntry, CommandType};
use warden_core::event::{EventRecord, EventType};
use warden_core::instance::{Instance, InstanceStatus, InstanceType};
use warden_core::stage::{Stage, TestType, WorkflowStatus};
use warden_core::workflow::{Workflow, WorkflowTransition};

use super::store::{ResultHistoryEntry, StoreError};

fn parse_error(entity: &str, column: &str, value: &str) -> StoreError {
    StoreError::Serialization(format!("{entity}: cannot parse {column} value '{value}'"))
}

/// Supervisor session row
#[derive(Debug, Clone, FromRow)]
pub struct InstanceRow {
    pub instance_id: String,
    pub project: String,
    pub instance_type: String,
    pub status: String,
    pub registration_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub context_window_percent: f64,
    pub current_epic: Option<String>,
    pub claude_session_uuid: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

impl TryFrom<InstanceRow> for Instance {
    type Error = StoreError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        Ok(Instance {
            instance_type: InstanceType::parse(&row.instance_type)
                .ok_or_else(|| parse_error("instance", "instance_type", &row.instance_type))?,
            status: InstanceStatus::parse(&row.status)
                .ok_or_else(|| parse_error("instance", "status", &row.status))?,
            instance_id: row.instance_id,
            project: row.project,
            registration_time: row.registration_time,
            last_heartbeat: row.last_heartbeat,
            context_window_percent: row.context_window_percent,
            current_epic: row.current_epic,
            claude_session_uuid: row.claude_session_uuid,
            metadata: row.metadata,
        })
    }
}

/// Event store row
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub event_id: Uuid,
    pub instance_id: String,
    pub event_type: String,
    pub sequence_num: i64,
    pub timestamp: DateTime<Utc>,
    pub event_data: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
}

impl TryFrom<EventRow> for EventRecord {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type = EventType::parse(&row.event_type)
            .map_err(|_| parse_error("event", "event_type", &row.event_type))?;
        Ok(EventRecord {
            event_id: row.event_id,
            instance_id: row.instance_id,
            event_type,
            sequence_num: row.sequence_num,
            timestamp: row.timestamp,
            event_data: row.event_data,
            metadata: row.metadata,
        })
    }
}

/// Command log row
#[derive(Debug, Clone, FromRow)]
pub struct CommandRow {
    pub id: i64,
    pub instance_id: String,
    pub command_type: String,
    pub action: String,
    pub tool_name: Option<String>,
    pub parameters: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub tags: serde_json::Value,
    pub context_data: Option<serde_json::Value>,
    pub source: Option<String>,
}

impl TryFrom<CommandRow> for CommandEntry {
    type Error = StoreError;

    fn try_from(row: CommandRow) -> Result<Self, Self::Error> {
        let command_type = CommandType::parse(&row.command_type)
            .ok_or_else(|| parse_error("command", "command_type", &row.command_type))?;
        let tags: Vec<String> = serde_json::from_value(row.tags).unwrap_or_default();
        Ok(CommandEntry {
            id: row.id,
            instance_id: row.instance_id,
            command_type,
            action: row.action,
            tool_name: row.tool_name,
            parameters: row.parameters,
            result: row.result,
            success: row.success,
            error_message: row.error_message,
            execution_time_ms: row.execution_time_ms.map(|v| v as u64),
            timestamp: row.timestamp,
            tags,
            context_data: row.context_data,
            source: row.source,
        })
    }
}

/// Checkpoint row
#[derive(Debug, Clone, FromRow)]
pub struct CheckpointRow {
    pub checkpoint_id: Uuid,
    pub instance_id: String,
    pub checkpoint_type: String,
    pub sequence_num: i64,
    pub timestamp: DateTime<Utc>,
    pub context_window_percent: f64,
    pub work_state: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = StoreError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        let checkpoint_type = CheckpointType::parse(&row.checkpoint_type)
            .ok_or_else(|| parse_error("checkpoint", "checkpoint_type", &row.checkpoint_type))?;
        Ok(Checkpoint {
            checkpoint_id: row.checkpoint_id,
            instance_id: row.instance_id,
            checkpoint_type,
            sequence_num: row.sequence_num,
            timestamp: row.timestamp,
            context_window_percent: row.context_window_percent,
            work_state: row.work_state,
            metadata: row.metadata,
        })
    }
}

/// Workflow row
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub test_id: String,
    pub epic_id: String,
    pub test_type: String,
    pub current_stage: String,
    pub status: String,
    pub execution_result: Option<serde_json::Value>,
    pub detection_result: Option<serde_json::Value>,
    pub verification_result: Option<serde_json::Value>,
    pub fixing_result: Option<serde_json::Value>,
    pub learning_result: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub escalated: bool,
    pub version: i32,
}

fn from_json<T: serde::de::DeserializeOwned>(
    value: Option<serde_json::Value>,
) -> Result<Option<T>, StoreError> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(StoreError::from)
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = StoreError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        Ok(Workflow {
            test_type: TestType::parse(&row.test_type)
                .ok_or_else(|| parse_error("workflow", "test_type", &row.test_type))?,
            current_stage: Stage::parse(&row.current_stage)
                .ok_or_else(|| parse_error("workflow", "current_stage", &row.current_stage))?,
            status: WorkflowStatus::parse(&row.status)
                .ok_or_else(|| parse_error("workflow", "status", &row.status))?,
            execution_result: from_json(row.execution_result)?,
            detection_result: from_json(row.detection_result)?,
            verification_result: from_json(row.verification_result)?,
            fixing_result: from_json(row.fixing_result)?,
            learning_result: from_json(row.learning_result)?,
            id: row.id,
            test_id: row.test_id,
            epic_id: row.epic_id,
            started_at: row.started_at,
            completed_at: row.completed_at,
            retry_count: row.retry_count.max(0) as u32,
            error_message: row.error_message,
            escalated: row.escalated,
            version: row.version,
        })
    }
}

/// Workflow transition history row
#[derive(Debug, Clone, FromRow)]
pub struct TransitionRow {
    pub workflow_id: Uuid,
    pub from_stage: String,
    pub to_stage: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

impl TryFrom<TransitionRow> for WorkflowTransition {
    type Error = StoreError;

    fn try_from(row: TransitionRow) -> Result<Self, Self::Error> {
        Ok(WorkflowTransition {
            from_stage: Stage::parse(&row.from_stage)
                .ok_or_else(|| parse_error("transition", "from_stage", &row.from_stage))?,
            to_stage: Stage::parse(&row.to_stage)
                .ok_or_else(|| parse_error("transition", "to_stage", &row.to_stage))?,
            workflow_id: row.workflow_id,
            timestamp: row.timestamp,
            reason: row.reason,
        })
    }
}

/// Stage-result history row
#[derive(Debug, Clone, FromRow)]
pub struct ResultHistoryRow {
    pub workflow_id: Uuid,
    pub stage: String,
    pub result: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<ResultHistoryRow> for ResultHistoryEntry {
    type Error = StoreError;

    fn try_from(row: ResultHistoryRow) -> Result<Self, Self::Error> {
        Ok(ResultHistoryEntry {
            stage: Stage::parse(&row.stage)
                .ok_or_else(|| parse_error("result_history", "stage", &row.stage))?,
            workflow_id: row.workflow_id,
            result: row.result,
            timestamp: row.timestamp,
        })
    }
}
