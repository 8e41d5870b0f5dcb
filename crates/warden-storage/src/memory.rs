//! In-memory implementation of KernelStore for testing
//!
//! Stores all data in memory with the same semantics as the PostgreSQL
//! implementation: per-instance sequence allocation, unique-key conflicts,
//! and version-checked workflow updates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use warden_core::checkpoint::Checkpoint;
use warden_core::command::{CommandEntry, CommandStats, NewCommandEntry};
use warden_core::event::{EventRecord, EventType};
use warden_core::instance::{Instance, InstanceStatus};
use warden_core::workflow::{Workflow, WorkflowTransition};

use super::store::*;

/// In-memory implementation of KernelStore
///
/// # Example
///
/// ```
/// use warden_storage::InMemoryKernelStore;
///
/// let store = InMemoryKernelStore::new();
/// ```
#[derive(Default)]
pub struct InMemoryKernelStore {
    instances: RwLock<HashMap<String, Instance>>,
    events: RwLock<HashMap<String, Vec<EventRecord>>>,
    commands: RwLock<Vec<CommandEntry>>,
    next_command_id: AtomicI64,
    checkpoints: RwLock<HashMap<Uuid, Checkpoint>>,
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    transitions: RwLock<Vec<WorkflowTransition>>,
    result_history: RwLock<Vec<ResultHistoryEntry>>,
}

impl InMemoryKernelStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            next_command_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    /// Number of registered instances
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Number of events across all instances
    pub fn event_count(&self) -> usize {
        self.events.read().values().map(|v| v.len()).sum()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.instances.write().clear();
        self.events.write().clear();
        self.commands.write().clear();
        self.checkpoints.write().clear();
        self.workflows.write().clear();
        self.transitions.write().clear();
        self.result_history.write().clear();
    }
}

#[async_trait]
impl KernelStore for InMemoryKernelStore {
    async fn insert_instance(&self, instance: Instance) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        if instances.contains_key(&instance.instance_id) {
            return Err(StoreError::Conflict(format!(
                "instance {} already registered",
                instance.instance_id
            )));
        }
        instances.insert(instance.instance_id.clone(), instance);
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance, StoreError> {
        self.instances
            .read()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))
    }

    async fn heartbeat_instance(
        &self,
        instance_id: &str,
        now: DateTime<Utc>,
        update: HeartbeatUpdate,
    ) -> Result<Instance, StoreError> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))?;

        instance.last_heartbeat = now;
        if let Some(percent) = update.context_window_percent {
            instance.context_window_percent = percent;
        }
        if let Some(epic) = update.current_epic {
            instance.current_epic = Some(epic);
        }
        if instance.status == InstanceStatus::Stale {
            instance.status = InstanceStatus::Active;
        }
        Ok(instance.clone())
    }

    async fn mark_instance_stale(&self, instance_id: &str) -> Result<Instance, StoreError> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))?;

        instance.status = InstanceStatus::Stale;
        Ok(instance.clone())
    }

    async fn close_instance(
        &self,
        instance_id: &str,
        reason: &str,
    ) -> Result<Instance, StoreError> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))?;

        instance.status = InstanceStatus::Closed;
        let mut metadata = instance
            .metadata
            .take()
            .and_then(|m| m.as_object().cloned())
            .unwrap_or_default();
        metadata.insert(
            "close_reason".to_string(),
            serde_json::Value::String(reason.to_string()),
        );
        instance.metadata = Some(serde_json::Value::Object(metadata));
        Ok(instance.clone())
    }

    async fn list_instances(
        &self,
        filter: InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<Instance>, StoreError> {
        let instances = self.instances.read();
        let mut matched: Vec<Instance> = instances
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.last_heartbeat.cmp(&a.last_heartbeat));

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();

        Ok(Page { items, total })
    }

    async fn append_event(
        &self,
        instance_id: &str,
        event_type: EventType,
        event_data: serde_json::Value,
        metadata: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> Result<EventRecord, StoreError> {
        if !self.instances.read().contains_key(instance_id) {
            return Err(StoreError::NotFound(format!("instance {instance_id}")));
        }

        let mut events = self.events.write();
        let log = events.entry(instance_id.to_string()).or_default();

        let event = EventRecord {
            event_id: Uuid::now_v7(),
            instance_id: instance_id.to_string(),
            event_type,
            sequence_num: log.len() as i64 + 1,
            timestamp,
            event_data,
            metadata,
        };
        log.push(event.clone());
        Ok(event)
    }

    async fn query_events(
        &self,
        instance_id: &str,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<Page<EventRecord>, StoreError> {
        let events = self.events.read();
        let log = events.get(instance_id).cloned().unwrap_or_default();

        let mut matched: Vec<EventRecord> =
            log.into_iter().filter(|e| filter.matches(e)).collect();
        matched.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(b.sequence_num.cmp(&a.sequence_num))
        });

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();

        Ok(Page { items, total })
    }

    async fn load_events(
        &self,
        instance_id: &str,
        after_sequence: Option<i64>,
        up_to_sequence: Option<i64>,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let events = self.events.read();
        let log = events.get(instance_id).cloned().unwrap_or_default();

        Ok(log
            .into_iter()
            .filter(|e| {
                after_sequence.map_or(true, |after| e.sequence_num > after)
                    && up_to_sequence.map_or(true, |up_to| e.sequence_num <= up_to)
            })
            .collect())
    }

    async fn max_sequence(&self, instance_id: &str) -> Result<i64, StoreError> {
        let events = self.events.read();
        Ok(events
            .get(instance_id)
            .map(|log| log.len() as i64)
            .unwrap_or(0))
    }

    async fn insert_command(
        &self,
        entry: NewCommandEntry,
        timestamp: DateTime<Utc>,
    ) -> Result<CommandEntry, StoreError> {
        let id = self.next_command_id.fetch_add(1, Ordering::SeqCst);
        let command = CommandEntry {
            id,
            instance_id: entry.instance_id,
            command_type: entry.command_type,
            action: entry.action,
            tool_name: entry.tool_name,
            parameters: entry.parameters,
            result: entry.result,
            success: entry.success,
            error_message: entry.error_message,
            execution_time_ms: entry.execution_time_ms,
            timestamp,
            tags: entry.tags,
            context_data: entry.context_data,
            source: entry.source,
        };
        self.commands.write().push(command.clone());
        Ok(command)
    }

    async fn search_commands(
        &self,
        filter: CommandFilter,
        pagination: Pagination,
    ) -> Result<Page<CommandEntry>, StoreError> {
        let commands = self.commands.read();
        let mut matched: Vec<CommandEntry> = commands
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();

        Ok(Page { items, total })
    }

    async fn get_command(&self, id: i64) -> Result<CommandEntry, StoreError> {
        self.commands
            .read()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("command {id}")))
    }

    async fn command_stats(&self, instance_id: &str) -> Result<CommandStats, StoreError> {
        let commands = self.commands.read();
        let mut stats = CommandStats::default();
        for command in commands.iter().filter(|c| c.instance_id == instance_id) {
            stats.total += 1;
            if command.success {
                stats.successful += 1;
            } else {
                stats.failed += 1;
            }
        }
        Ok(stats)
    }

    async fn insert_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.write();
        let duplicate = checkpoints.values().any(|c| {
            c.instance_id == checkpoint.instance_id && c.sequence_num == checkpoint.sequence_num
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "checkpoint for instance {} at sequence {} already exists",
                checkpoint.instance_id, checkpoint.sequence_num
            )));
        }
        checkpoints.insert(checkpoint.checkpoint_id, checkpoint);
        Ok(())
    }

    async fn latest_checkpoint(
        &self,
        instance_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let checkpoints = self.checkpoints.read();
        Ok(checkpoints
            .values()
            .filter(|c| c.instance_id == instance_id)
            .max_by_key(|c| (c.timestamp, c.sequence_num))
            .cloned())
    }

    async fn get_checkpoint(&self, checkpoint_id: Uuid) -> Result<Checkpoint, StoreError> {
        self.checkpoints
            .read()
            .get(&checkpoint_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("checkpoint {checkpoint_id}")))
    }

    async fn insert_workflow(&self, workflow: Workflow) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        if workflows.values().any(|w| w.test_id == workflow.test_id) {
            return Err(StoreError::Conflict(format!(
                "workflow for test {} already exists",
                workflow.test_id
            )));
        }
        workflows.insert(workflow.id, workflow);
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow, StoreError> {
        self.workflows
            .read()
            .get(&workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workflow {workflow_id}")))
    }

    async fn update_workflow(
        &self,
        workflow: &Workflow,
        expected_version: i32,
    ) -> Result<Workflow, StoreError> {
        let mut workflows = self.workflows.write();
        let stored = workflows
            .get_mut(&workflow.id)
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow.id)))?;

        if stored.version != expected_version {
            return Err(StoreError::Conflict(format!(
                "workflow {} version check failed: expected {}, stored {}",
                workflow.id, expected_version, stored.version
            )));
        }

        let mut updated = workflow.clone();
        updated.version = expected_version + 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list_workflows_by_epic(&self, epic_id: &str) -> Result<Vec<Workflow>, StoreError> {
        let workflows = self.workflows.read();
        let mut matched: Vec<Workflow> = workflows
            .values()
            .filter(|w| w.epic_id == epic_id)
            .cloned()
            .collect();
        matched.sort_by_key(|w| w.started_at);
        Ok(matched)
    }

    async fn append_transition(&self, transition: WorkflowTransition) -> Result<(), StoreError> {
        self.transitions.write().push(transition);
        Ok(())
    }

    async fn list_transitions(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowTransition>, StoreError> {
        Ok(self
            .transitions
            .read()
            .iter()
            .filter(|t| t.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn append_result_history(&self, entry: ResultHistoryEntry) -> Result<(), StoreError> {
        self.result_history.write().push(entry);
        Ok(())
    }

    async fn list_result_history(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<ResultHistoryEntry>, StoreError> {
        Ok(self
            .result_history
            .read()
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::instance::{generate_instance_id, InstanceType};
    use warden_core::stage::TestType;
    use warden_core::workflow::TestDefinition;

    fn sample_instance() -> Instance {
        Instance {
            instance_id: generate_instance_id(),
            project: "checkout".into(),
            instance_type: InstanceType::Ps,
            status: InstanceStatus::Active,
            registration_time: Utc::now(),
            last_heartbeat: Utc::now(),
            context_window_percent: 0.0,
            current_epic: None,
            claude_session_uuid: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_instance_conflict_on_duplicate_id() {
        let store = InMemoryKernelStore::new();
        let instance = sample_instance();

        store.insert_instance(instance.clone()).await.unwrap();
        let result = store.insert_instance(instance).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_event_sequence_is_gap_free() {
        let store = InMemoryKernelStore::new();
        let instance = sample_instance();
        let id = instance.instance_id.clone();
        store.insert_instance(instance).await.unwrap();

        for i in 0..5 {
            let event = store
                .append_event(
                    &id,
                    EventType::TestStarted,
                    json!({"test_id": format!("T{i}")}),
                    None,
                    Utc::now(),
                )
                .await
                .unwrap();
            assert_eq!(event.sequence_num, i + 1);
        }

        assert_eq!(store.max_sequence(&id).await.unwrap(), 5);
        let events = store.load_events(&id, None, None).await.unwrap();
        let sequences: Vec<i64> = events.iter().map(|e| e.sequence_num).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_append_event_requires_instance() {
        let store = InMemoryKernelStore::new();
        let result = store
            .append_event(
                "missing000000",
                EventType::TestStarted,
                json!({"test_id": "T1"}),
                None,
                Utc::now(),
            )
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_heartbeat_reactivates_stale_instance() {
        let store = InMemoryKernelStore::new();
        let instance = sample_instance();
        let id = instance.instance_id.clone();
        store.insert_instance(instance).await.unwrap();

        store.mark_instance_stale(&id).await.unwrap();
        assert_eq!(
            store.get_instance(&id).await.unwrap().status,
            InstanceStatus::Stale
        );

        let updated = store
            .heartbeat_instance(&id, Utc::now(), HeartbeatUpdate::default())
            .await
            .unwrap();
        assert_eq!(updated.status, InstanceStatus::Active);
    }

    #[tokio::test]
    async fn test_workflow_version_check() {
        let store = InMemoryKernelStore::new();
        let workflow = Workflow::new(&TestDefinition::new("T1", "E1", TestType::Ui));
        store.insert_workflow(workflow.clone()).await.unwrap();

        let updated = store.update_workflow(&workflow, 1).await.unwrap();
        assert_eq!(updated.version, 2);

        // A second writer holding the old version loses
        let result = store.update_workflow(&workflow, 1).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_workflow_test_id_unique() {
        let store = InMemoryKernelStore::new();
        let definition = TestDefinition::new("T1", "E1", TestType::Ui);
        store
            .insert_workflow(Workflow::new(&definition))
            .await
            .unwrap();
        let result = store.insert_workflow(Workflow::new(&definition)).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_checkpoint_conflict_on_sequence() {
        let store = InMemoryKernelStore::new();
        let instance = sample_instance();
        let id = instance.instance_id.clone();
        store.insert_instance(instance).await.unwrap();

        let checkpoint = Checkpoint {
            checkpoint_id: Uuid::now_v7(),
            instance_id: id.clone(),
            checkpoint_type: warden_core::CheckpointType::Manual,
            sequence_num: 3,
            timestamp: Utc::now(),
            context_window_percent: 40.0,
            work_state: json!({"epic": "E1"}),
            metadata: None,
        };
        store.insert_checkpoint(checkpoint.clone()).await.unwrap();

        let mut duplicate = checkpoint;
        duplicate.checkpoint_id = Uuid::now_v7();
        let result = store.insert_checkpoint(duplicate).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_command_search_ordering_and_stats() {
        let store = InMemoryKernelStore::new();
        let base = Utc::now();

        for i in 0..3 {
            let entry = NewCommandEntry::new(
                "abc123def456",
                warden_core::CommandType::Auto,
                "run_stage",
                i != 1,
            );
            store
                .insert_command(entry, base + chrono::Duration::seconds(i))
                .await
                .unwrap();
        }

        let page = store
            .search_commands(
                CommandFilter {
                    instance_id: Some("abc123def456".into()),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        // Newest first
        assert!(page.items[0].timestamp > page.items[2].timestamp);

        let stats = store.command_stats("abc123def456").await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_event_filter_keyword_and_window() {
        let store = InMemoryKernelStore::new();
        let instance = sample_instance();
        let id = instance.instance_id.clone();
        store.insert_instance(instance).await.unwrap();

        let early = Utc::now() - chrono::Duration::seconds(60);
        store
            .append_event(&id, EventType::TestStarted, json!({"test_id": "T1"}), None, early)
            .await
            .unwrap();
        store
            .append_event(
                &id,
                EventType::TestPassed,
                json!({"test_id": "T2"}),
                None,
                Utc::now(),
            )
            .await
            .unwrap();

        let page = store
            .query_events(
                &id,
                EventFilter {
                    keyword: Some("T2".into()),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].event_type, EventType::TestPassed);

        let page = store
            .query_events(
                &id,
                EventFilter {
                    until: Some(Utc::now() - chrono::Duration::seconds(30)),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].event_type, EventType::TestStarted);
    }
}
