//! KernelStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use warden_core::checkpoint::Checkpoint;
use warden_core::command::{CommandEntry, CommandStats, NewCommandEntry};
use warden_core::error::KernelError;
use warden_core::event::{EventRecord, EventType};
use warden_core::instance::{Instance, InstanceStatus};
use warden_core::stage::Stage;
use warden_core::workflow::{Workflow, WorkflowTransition};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Entity not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-key or version-check violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient database failure
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for KernelError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(msg) => KernelError::NotFound(msg),
            StoreError::Conflict(msg) => KernelError::Conflict(msg),
            StoreError::Unavailable(msg) => KernelError::Unavailable(msg),
            StoreError::Serialization(msg) => KernelError::Validation(msg),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

/// Filter for event queries
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Match any of these event types (empty = all)
    pub event_types: Vec<EventType>,

    /// Half-open time window: `since <= timestamp < until`
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,

    /// Substring match over the serialized event payload
    pub keyword: Option<String>,
}

impl EventFilter {
    pub fn matches(&self, event: &EventRecord) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp >= until {
                return false;
            }
        }
        if let Some(keyword) = &self.keyword {
            // Case-insensitive, matching the ILIKE semantics of the SQL path
            let serialized = event.event_data.to_string().to_lowercase();
            if !serialized.contains(&keyword.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Filter for command log searches
#[derive(Debug, Clone, Default)]
pub struct CommandFilter {
    pub instance_id: Option<String>,
    pub action: Option<String>,
    pub success_only: bool,

    /// Half-open time window: `since <= timestamp < until`
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl CommandFilter {
    pub fn matches(&self, entry: &CommandEntry) -> bool {
        if let Some(instance_id) = &self.instance_id {
            if &entry.instance_id != instance_id {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }
        if self.success_only && !entry.success {
            return false;
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp >= until {
                return false;
            }
        }
        true
    }
}

/// Filter for instance listings and resolution
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub status: Option<InstanceStatus>,
    pub project: Option<String>,
    pub current_epic: Option<String>,
    pub id_prefix: Option<String>,
}

impl InstanceFilter {
    pub fn active() -> Self {
        Self {
            status: Some(InstanceStatus::Active),
            ..Default::default()
        }
    }

    pub fn stale() -> Self {
        Self {
            status: Some(InstanceStatus::Stale),
            ..Default::default()
        }
    }

    pub fn matches(&self, instance: &Instance) -> bool {
        if let Some(status) = self.status {
            if instance.status != status {
                return false;
            }
        }
        if let Some(project) = &self.project {
            if &instance.project != project {
                return false;
            }
        }
        if let Some(epic) = &self.current_epic {
            if instance.current_epic.as_deref() != Some(epic.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.id_prefix {
            if !instance.instance_id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Pagination parameters
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

/// A page of results plus the unpaginated total
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn has_more(&self, pagination: Pagination) -> bool {
        (pagination.offset as u64 + self.items.len() as u64) < self.total
    }
}

/// Heartbeat update applied to an instance row
#[derive(Debug, Clone, Default)]
pub struct HeartbeatUpdate {
    pub context_window_percent: Option<f64>,
    pub current_epic: Option<String>,
}

/// One stored stage-result write, kept append-only for auditing
#[derive(Debug, Clone, PartialEq)]
pub struct ResultHistoryEntry {
    pub workflow_id: Uuid,
    pub stage: Stage,
    pub result: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Store for every kernel entity
///
/// Implementations must be thread-safe. Append-only inserts (events,
/// command log, checkpoints, transitions) are conflict-safe on their unique
/// keys; workflow updates are guarded by a per-row version check. Event
/// sequence allocation is serialized per instance inside the store.
#[async_trait]
pub trait KernelStore: Send + Sync + 'static {
    // =========================================================================
    // Instances
    // =========================================================================

    /// Insert a new instance row; `Conflict` if the id exists
    async fn insert_instance(&self, instance: Instance) -> Result<(), StoreError>;

    /// Fetch an instance by exact id
    async fn get_instance(&self, instance_id: &str) -> Result<Instance, StoreError>;

    /// Apply a heartbeat: `last_heartbeat = now`, optional field updates,
    /// and stale instances flip back to active. Returns the updated row.
    async fn heartbeat_instance(
        &self,
        instance_id: &str,
        now: DateTime<Utc>,
        update: HeartbeatUpdate,
    ) -> Result<Instance, StoreError>;

    /// Set an active instance to stale
    async fn mark_instance_stale(&self, instance_id: &str) -> Result<Instance, StoreError>;

    /// Close an instance (terminal)
    async fn close_instance(&self, instance_id: &str, reason: &str)
        -> Result<Instance, StoreError>;

    /// List instances matching a filter, most recent heartbeat first
    async fn list_instances(
        &self,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<Instance>, StoreError>;

    // =========================================================================
    // Events
    // =========================================================================

    /// Append an event, atomically allocating the next per-instance
    /// sequence number (starting at 1)
    async fn append_event(
        &self,
        instance_id: &str,
        event_type: EventType,
        event_data: serde_json::Value,
        metadata: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> Result<EventRecord, StoreError>;

    /// Query events newest-first by `(timestamp DESC, sequence_num DESC)`
    async fn query_events(
        &self,
        instance_id: &str,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<Page<EventRecord>, StoreError>;

    /// Load events in ascending sequence order within
    /// `(after_sequence, up_to_sequence]`
    async fn load_events(
        &self,
        instance_id: &str,
        after_sequence: Option<i64>,
        up_to_sequence: Option<i64>,
    ) -> Result<Vec<EventRecord>, StoreError>;

    /// Highest allocated sequence number for an instance (0 if none)
    async fn max_sequence(&self, instance_id: &str) -> Result<i64, StoreError>;

    // =========================================================================
    // Command Log
    // =========================================================================

    /// Insert an already-redacted command entry, allocating its id
    async fn insert_command(
        &self,
        entry: NewCommandEntry,
        timestamp: DateTime<Utc>,
    ) -> Result<CommandEntry, StoreError>;

    /// Search commands, `timestamp DESC, id DESC`
    async fn search_commands(
        &self,
        filter: CommandFilter,
        pagination: Pagination,
    ) -> Result<Page<CommandEntry>, StoreError>;

    /// Fetch a command entry by primary key
    async fn get_command(&self, id: i64) -> Result<CommandEntry, StoreError>;

    /// Per-instance success/failure counts
    async fn command_stats(&self, instance_id: &str) -> Result<CommandStats, StoreError>;

    // =========================================================================
    // Checkpoints
    // =========================================================================

    /// Insert a checkpoint; `Conflict` on `(instance_id, sequence_num)`
    async fn insert_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError>;

    /// Most recent checkpoint for an instance
    async fn latest_checkpoint(&self, instance_id: &str)
        -> Result<Option<Checkpoint>, StoreError>;

    /// Fetch a checkpoint by id
    async fn get_checkpoint(&self, checkpoint_id: Uuid) -> Result<Checkpoint, StoreError>;

    // =========================================================================
    // Workflows
    // =========================================================================

    /// Insert a new workflow; `Conflict` if the test_id is taken
    async fn insert_workflow(&self, workflow: Workflow) -> Result<(), StoreError>;

    /// Fetch a workflow by id
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow, StoreError>;

    /// Replace a workflow row if the stored version matches
    /// `expected_version`; bumps the version and returns the updated row
    async fn update_workflow(
        &self,
        workflow: &Workflow,
        expected_version: i32,
    ) -> Result<Workflow, StoreError>;

    /// All workflows for an epic, oldest first
    async fn list_workflows_by_epic(&self, epic_id: &str) -> Result<Vec<Workflow>, StoreError>;

    /// Append a transition to the audit history
    async fn append_transition(&self, transition: WorkflowTransition) -> Result<(), StoreError>;

    /// Transition history for a workflow, oldest first
    async fn list_transitions(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowTransition>, StoreError>;

    /// Append a stage-result write to the audit history
    async fn append_result_history(&self, entry: ResultHistoryEntry) -> Result<(), StoreError>;

    /// Stage-result history for a workflow, oldest first
    async fn list_result_history(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<ResultHistoryEntry>, StoreError>;
}
