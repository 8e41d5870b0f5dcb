//! PostgreSQL implementation of KernelStore
//!
//! Production persistence using PostgreSQL with:
//! - Per-instance event sequence allocation serialized by a row lock on the
//!   owning supervisor session
//! - Unique-key conflicts surfaced as `StoreError::Conflict`
//! - Version-checked workflow updates (optimistic concurrency)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use warden_core::checkpoint::Checkpoint;
use warden_core::command::{CommandEntry, CommandStats, NewCommandEntry};
use warden_core::event::{EventRecord, EventType};
use warden_core::instance::Instance;
use warden_core::workflow::{Workflow, WorkflowTransition};

use super::models::*;
use super::store::*;

const INSTANCE_COLUMNS: &str = "instance_id, project, instance_type::text AS instance_type, \
     status::text AS status, registration_time, last_heartbeat, context_window_percent, \
     current_epic, claude_session_uuid, metadata";

const WORKFLOW_COLUMNS: &str = "id, test_id, epic_id, test_type, \
     current_stage::text AS current_stage, status::text AS status, execution_result, \
     detection_result, verification_result, fixing_result, learning_result, started_at, \
     completed_at, retry_count, error_message, escalated, version";

const COMMAND_COLUMNS: &str = "id, instance_id, command_type, action, tool_name, parameters, \
     result, success, error_message, execution_time_ms, timestamp, tags, context_data, source";

const CHECKPOINT_COLUMNS: &str = "checkpoint_id, instance_id, \
     checkpoint_type::text AS checkpoint_type, sequence_num, timestamp, \
     context_window_percent, work_state, metadata";

/// PostgreSQL implementation of KernelStore
///
/// Uses a connection pool for efficient database access.
///
/// # Example
///
/// ```ignore
/// use warden_storage::PostgresKernelStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/warden").await?;
/// let store = PostgresKernelStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresKernelStore {
    pool: PgPool,
}

impl PostgresKernelStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn db_err(error: sqlx::Error) -> StoreError {
    if let Some(db) = error.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Unavailable(error.to_string())
}

#[async_trait]
impl KernelStore for PostgresKernelStore {
    #[instrument(skip(self, instance), fields(instance_id = %instance.instance_id))]
    async fn insert_instance(&self, instance: Instance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO supervisor_sessions
                (instance_id, project, instance_type, status, registration_time,
                 last_heartbeat, context_window_percent, current_epic,
                 claude_session_uuid, metadata)
            VALUES ($1, $2, $3::instance_type, $4::instance_status, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&instance.instance_id)
        .bind(&instance.project)
        .bind(instance.instance_type.to_string())
        .bind(instance.status.to_string())
        .bind(instance.registration_time)
        .bind(instance.last_heartbeat)
        .bind(instance.context_window_percent)
        .bind(&instance.current_epic)
        .bind(instance.claude_session_uuid)
        .bind(&instance.metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert instance: {}", e);
            db_err(e)
        })?;

        debug!("registered instance");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_instance(&self, instance_id: &str) -> Result<Instance, StoreError> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM supervisor_sessions WHERE instance_id = $1"
        ))
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))?;

        row.try_into()
    }

    #[instrument(skip(self, update))]
    async fn heartbeat_instance(
        &self,
        instance_id: &str,
        now: DateTime<Utc>,
        update: HeartbeatUpdate,
    ) -> Result<Instance, StoreError> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            UPDATE supervisor_sessions
            SET
                last_heartbeat = $2,
                context_window_percent = COALESCE($3, context_window_percent),
                current_epic = COALESCE($4, current_epic),
                status = CASE WHEN status = 'stale' THEN 'active'::instance_status
                              ELSE status END
            WHERE instance_id = $1
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(instance_id)
        .bind(now)
        .bind(update.context_window_percent)
        .bind(&update.current_epic)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))?;

        row.try_into()
    }

    #[instrument(skip(self))]
    async fn mark_instance_stale(&self, instance_id: &str) -> Result<Instance, StoreError> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            UPDATE supervisor_sessions
            SET status = 'stale'::instance_status
            WHERE instance_id = $1
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))?;

        row.try_into()
    }

    #[instrument(skip(self))]
    async fn close_instance(
        &self,
        instance_id: &str,
        reason: &str,
    ) -> Result<Instance, StoreError> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            UPDATE supervisor_sessions
            SET
                status = 'closed'::instance_status,
                metadata = jsonb_set(COALESCE(metadata, '{{}}'::jsonb),
                                     '{{close_reason}}', to_jsonb($2::text))
            WHERE instance_id = $1
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(instance_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))?;

        row.try_into()
    }

    #[instrument(skip(self, filter))]
    async fn list_instances(
        &self,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<Instance>, StoreError> {
        let status = filter.status.map(|s| s.to_string());
        let prefix = filter.id_prefix.map(|p| format!("{p}%"));

        let where_clause = r#"
            WHERE ($1::text IS NULL OR status = $1::instance_status)
              AND ($2::text IS NULL OR project = $2)
              AND ($3::text IS NULL OR current_epic = $3)
              AND ($4::text IS NULL OR instance_id LIKE $4)
        "#;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM supervisor_sessions {where_clause}"
        ))
        .bind(&status)
        .bind(&filter.project)
        .bind(&filter.current_epic)
        .bind(&prefix)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS} FROM supervisor_sessions
            {where_clause}
            ORDER BY last_heartbeat DESC
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(&status)
        .bind(&filter.project)
        .bind(&filter.current_epic)
        .bind(&prefix)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let items = rows
            .into_iter()
            .map(Instance::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total: total as u64,
        })
    }

    #[instrument(skip(self, event_data, metadata))]
    async fn append_event(
        &self,
        instance_id: &str,
        event_type: EventType,
        event_data: serde_json::Value,
        metadata: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> Result<EventRecord, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Lock the owning session row to serialize sequence allocation
        // per instance; also validates the instance exists.
        let locked = sqlx::query(
            "SELECT instance_id FROM supervisor_sessions WHERE instance_id = $1 FOR UPDATE",
        )
        .bind(instance_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        if locked.is_none() {
            return Err(StoreError::NotFound(format!("instance {instance_id}")));
        }

        let next_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_num), 0) + 1 FROM event_store WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let event_id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO event_store
                (event_id, instance_id, event_type, sequence_num, timestamp, event_data, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event_id)
        .bind(instance_id)
        .bind(event_type.as_str())
        .bind(next_seq)
        .bind(timestamp)
        .bind(&event_data)
        .bind(&metadata)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(sequence_num = next_seq, "appended event");
        Ok(EventRecord {
            event_id,
            instance_id: instance_id.to_string(),
            event_type,
            sequence_num: next_seq,
            timestamp,
            event_data,
            metadata,
        })
    }

    #[instrument(skip(self, filter))]
    async fn query_events(
        &self,
        instance_id: &str,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<Page<EventRecord>, StoreError> {
        let types: Option<Vec<String>> = if filter.event_types.is_empty() {
            None
        } else {
            Some(
                filter
                    .event_types
                    .iter()
                    .map(|t| t.as_str().to_string())
                    .collect(),
            )
        };
        let keyword = filter.keyword.map(|k| format!("%{k}%"));

        let where_clause = r#"
            WHERE instance_id = $1
              AND ($2::text[] IS NULL OR event_type = ANY($2))
              AND ($3::timestamptz IS NULL OR timestamp >= $3)
              AND ($4::timestamptz IS NULL OR timestamp < $4)
              AND ($5::text IS NULL OR event_data::text ILIKE $5)
        "#;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM event_store {where_clause}"
        ))
        .bind(instance_id)
        .bind(&types)
        .bind(filter.since)
        .bind(filter.until)
        .bind(&keyword)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT event_id, instance_id, event_type, sequence_num, timestamp,
                   event_data, metadata
            FROM event_store
            {where_clause}
            ORDER BY timestamp DESC, sequence_num DESC
            LIMIT $6 OFFSET $7
            "#
        ))
        .bind(instance_id)
        .bind(&types)
        .bind(filter.since)
        .bind(filter.until)
        .bind(&keyword)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let items = rows
            .into_iter()
            .map(EventRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total: total as u64,
        })
    }

    #[instrument(skip(self))]
    async fn load_events(
        &self,
        instance_id: &str,
        after_sequence: Option<i64>,
        up_to_sequence: Option<i64>,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT event_id, instance_id, event_type, sequence_num, timestamp,
                   event_data, metadata
            FROM event_store
            WHERE instance_id = $1
              AND ($2::bigint IS NULL OR sequence_num > $2)
              AND ($3::bigint IS NULL OR sequence_num <= $3)
            ORDER BY sequence_num ASC
            "#,
        )
        .bind(instance_id)
        .bind(after_sequence)
        .bind(up_to_sequence)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(EventRecord::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn max_sequence(&self, instance_id: &str) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_num), 0) FROM event_store WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    #[instrument(skip(self, entry), fields(action = %entry.action))]
    async fn insert_command(
        &self,
        entry: NewCommandEntry,
        timestamp: DateTime<Utc>,
    ) -> Result<CommandEntry, StoreError> {
        let tags = serde_json::to_value(&entry.tags)?;

        let row = sqlx::query_as::<_, CommandRow>(&format!(
            r#"
            INSERT INTO command_log
                (instance_id, command_type, action, tool_name, parameters, result,
                 success, error_message, execution_time_ms, timestamp, tags,
                 context_data, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {COMMAND_COLUMNS}
            "#
        ))
        .bind(&entry.instance_id)
        .bind(entry.command_type.to_string())
        .bind(&entry.action)
        .bind(&entry.tool_name)
        .bind(&entry.parameters)
        .bind(&entry.result)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.execution_time_ms.map(|v| v as i64))
        .bind(timestamp)
        .bind(&tags)
        .bind(&entry.context_data)
        .bind(&entry.source)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.try_into()
    }

    #[instrument(skip(self, filter))]
    async fn search_commands(
        &self,
        filter: CommandFilter,
        pagination: Pagination,
    ) -> Result<Page<CommandEntry>, StoreError> {
        let where_clause = r#"
            WHERE ($1::text IS NULL OR instance_id = $1)
              AND ($2::text IS NULL OR action = $2)
              AND (NOT $3 OR success)
              AND ($4::timestamptz IS NULL OR timestamp >= $4)
              AND ($5::timestamptz IS NULL OR timestamp < $5)
        "#;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM command_log {where_clause}"
        ))
        .bind(&filter.instance_id)
        .bind(&filter.action)
        .bind(filter.success_only)
        .bind(filter.since)
        .bind(filter.until)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let rows = sqlx::query_as::<_, CommandRow>(&format!(
            r#"
            SELECT {COMMAND_COLUMNS} FROM command_log
            {where_clause}
            ORDER BY timestamp DESC, id DESC
            LIMIT $6 OFFSET $7
            "#
        ))
        .bind(&filter.instance_id)
        .bind(&filter.action)
        .bind(filter.success_only)
        .bind(filter.since)
        .bind(filter.until)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let items = rows
            .into_iter()
            .map(CommandEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total: total as u64,
        })
    }

    #[instrument(skip(self))]
    async fn get_command(&self, id: i64) -> Result<CommandEntry, StoreError> {
        let row = sqlx::query_as::<_, CommandRow>(&format!(
            "SELECT {COMMAND_COLUMNS} FROM command_log WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("command {id}")))?;

        row.try_into()
    }

    #[instrument(skip(self))]
    async fn command_stats(&self, instance_id: &str) -> Result<CommandStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE success) AS successful,
                COUNT(*) FILTER (WHERE NOT success) AS failed
            FROM command_log
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(CommandStats {
            total: row.get::<i64, _>("total") as u64,
            successful: row.get::<i64, _>("successful") as u64,
            failed: row.get::<i64, _>("failed") as u64,
        })
    }

    #[instrument(skip(self, checkpoint), fields(instance_id = %checkpoint.instance_id))]
    async fn insert_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints
                (checkpoint_id, instance_id, checkpoint_type, sequence_num, timestamp,
                 context_window_percent, work_state, metadata)
            VALUES ($1, $2, $3::checkpoint_type, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(checkpoint.checkpoint_id)
        .bind(&checkpoint.instance_id)
        .bind(checkpoint.checkpoint_type.to_string())
        .bind(checkpoint.sequence_num)
        .bind(checkpoint.timestamp)
        .bind(checkpoint.context_window_percent)
        .bind(&checkpoint.work_state)
        .bind(&checkpoint.metadata)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest_checkpoint(
        &self,
        instance_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            r#"
            SELECT {CHECKPOINT_COLUMNS} FROM checkpoints
            WHERE instance_id = $1
            ORDER BY timestamp DESC, sequence_num DESC
            LIMIT 1
            "#
        ))
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Checkpoint::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_checkpoint(&self, checkpoint_id: Uuid) -> Result<Checkpoint, StoreError> {
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE checkpoint_id = $1"
        ))
        .bind(checkpoint_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("checkpoint {checkpoint_id}")))?;

        row.try_into()
    }

    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    async fn insert_workflow(&self, workflow: Workflow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, test_id, epic_id, test_type, current_stage, status,
                 started_at, retry_count, escalated, version)
            VALUES ($1, $2, $3, $4, $5::workflow_stage, $6::workflow_status, $7, $8, $9, $10)
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.test_id)
        .bind(&workflow.epic_id)
        .bind(workflow.test_type.to_string())
        .bind(workflow.current_stage.to_string())
        .bind(workflow.status.to_string())
        .bind(workflow.started_at)
        .bind(workflow.retry_count as i32)
        .bind(workflow.escalated)
        .bind(workflow.version)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!("created workflow");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("workflow {workflow_id}")))?;

        row.try_into()
    }

    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    async fn update_workflow(
        &self,
        workflow: &Workflow,
        expected_version: i32,
    ) -> Result<Workflow, StoreError> {
        let execution = workflow
            .execution_result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let detection = workflow
            .detection_result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let verification = workflow
            .verification_result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let fixing = workflow
            .fixing_result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let learning = workflow
            .learning_result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            UPDATE workflows
            SET
                current_stage = $3::workflow_stage,
                status = $4::workflow_status,
                execution_result = $5,
                detection_result = $6,
                verification_result = $7,
                fixing_result = $8,
                learning_result = $9,
                completed_at = $10,
                retry_count = $11,
                error_message = $12,
                escalated = $13,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {WORKFLOW_COLUMNS}
            "#
        ))
        .bind(workflow.id)
        .bind(expected_version)
        .bind(workflow.current_stage.to_string())
        .bind(workflow.status.to_string())
        .bind(&execution)
        .bind(&detection)
        .bind(&verification)
        .bind(&fixing)
        .bind(&learning)
        .bind(workflow.completed_at)
        .bind(workflow.retry_count as i32)
        .bind(&workflow.error_message)
        .bind(workflow.escalated)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => row.try_into(),
            None => {
                // Distinguish a stale version from a missing row
                let exists: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM workflows WHERE id = $1")
                        .bind(workflow.id)
                        .fetch_one(&self.pool)
                        .await
                        .map_err(db_err)?;
                if exists > 0 {
                    Err(StoreError::Conflict(format!(
                        "workflow {} version check failed at version {expected_version}",
                        workflow.id
                    )))
                } else {
                    Err(StoreError::NotFound(format!("workflow {}", workflow.id)))
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn list_workflows_by_epic(&self, epic_id: &str) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS} FROM workflows
            WHERE epic_id = $1
            ORDER BY started_at ASC
            "#
        ))
        .bind(epic_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(Workflow::try_from).collect()
    }

    #[instrument(skip(self, transition), fields(workflow_id = %transition.workflow_id))]
    async fn append_transition(&self, transition: WorkflowTransition) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_transitions (workflow_id, from_stage, to_stage, timestamp, reason)
            VALUES ($1, $2::workflow_stage, $3::workflow_stage, $4, $5)
            "#,
        )
        .bind(transition.workflow_id)
        .bind(transition.from_stage.to_string())
        .bind(transition.to_stage.to_string())
        .bind(transition.timestamp)
        .bind(&transition.reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_transitions(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowTransition>, StoreError> {
        let rows = sqlx::query_as::<_, TransitionRow>(
            r#"
            SELECT workflow_id, from_stage::text AS from_stage, to_stage::text AS to_stage,
                   timestamp, reason
            FROM workflow_transitions
            WHERE workflow_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(WorkflowTransition::try_from).collect()
    }

    #[instrument(skip(self, entry), fields(workflow_id = %entry.workflow_id))]
    async fn append_result_history(&self, entry: ResultHistoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_result_history (workflow_id, stage, result, timestamp)
            VALUES ($1, $2::workflow_stage, $3, $4)
            "#,
        )
        .bind(entry.workflow_id)
        .bind(entry.stage.to_string())
        .bind(&entry.result)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_result_history(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<ResultHistoryEntry>, StoreError> {
        let rows = sqlx::query_as::<_, ResultHistoryRow>(
            r#"
            SELECT workflow_id, stage::text AS stage, result, timestamp
            FROM workflow_result_history
            WHERE workflow_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(ResultHistoryEntry::try_from).collect()
    }
}
