//! Event store service
//!
//! Append-only, per-instance, monotonically sequenced. Appends validate the
//! event type and payload against the closed registry, then serialize
//! through the per-instance lock. Replay is a pure fold over events in
//! ascending sequence order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use warden_core::error::KernelError;
use warden_core::event::{EventRecord, EventType, EventTypeDefinition};
use warden_storage::{EventFilter, KernelStore, Pagination};

use crate::locks::InstanceLocks;

/// Outcome of a successful append
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendedEvent {
    pub event_id: Uuid,
    pub sequence_num: i64,
    pub timestamp: DateTime<Utc>,
}

/// A page of queried events
#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<EventRecord>,
    pub total: u64,
    pub has_more: bool,
}

/// Accumulated state produced by replaying an instance's events
///
/// Each event type contributes a well-defined slice of this state, so the
/// fold is deterministic: the same event list always produces the same
/// accumulator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayState {
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_epic: Option<String>,
    pub completed_epics: Vec<String>,
    pub failed_epics: Vec<String>,

    pub tests_started: u64,
    pub tests_passed: u64,
    pub tests_failed: u64,
    pub validations_passed: u64,
    pub validations_failed: u64,

    pub commits: u64,
    pub prs_created: u64,
    pub prs_merged: u64,

    pub deployments_started: u64,
    pub deployments_completed: u64,
    pub deployments_failed: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_percent: Option<f64>,
    pub checkpoints_created: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_id: Option<String>,

    pub epics_planned: u64,
    pub features_requested: u64,
    pub tasks_spawned: u64,

    pub stale_transitions: u64,

    /// Sequence of the last folded event (0 when none)
    pub last_sequence: i64,
}

impl ReplayState {
    /// Fold one event into the accumulator
    fn apply(&mut self, event: &EventRecord) {
        let data = &event.event_data;
        let str_field = |name: &str| data.get(name).and_then(|v| v.as_str()).map(String::from);

        match event.event_type {
            EventType::InstanceRegistered => {
                self.registered = true;
                self.project = str_field("project");
                self.instance_type = str_field("instance_type");
            }
            EventType::InstanceHeartbeat => {
                if let Some(percent) = data.get("context_window_percent").and_then(|v| v.as_f64())
                {
                    self.context_window_percent = Some(percent);
                }
            }
            EventType::InstanceStale => self.stale_transitions += 1,
            EventType::EpicStarted => self.current_epic = str_field("epic_id"),
            EventType::EpicCompleted => {
                if let Some(epic) = str_field("epic_id") {
                    if self.current_epic.as_deref() == Some(epic.as_str()) {
                        self.current_epic = None;
                    }
                    self.completed_epics.push(epic);
                }
            }
            EventType::EpicFailed => {
                if let Some(epic) = str_field("epic_id") {
                    if self.current_epic.as_deref() == Some(epic.as_str()) {
                        self.current_epic = None;
                    }
                    self.failed_epics.push(epic);
                }
            }
            EventType::TestStarted => self.tests_started += 1,
            EventType::TestPassed => self.tests_passed += 1,
            EventType::TestFailed => self.tests_failed += 1,
            EventType::ValidationPassed => self.validations_passed += 1,
            EventType::ValidationFailed => self.validations_failed += 1,
            EventType::CommitCreated => self.commits += 1,
            EventType::PrCreated => self.prs_created += 1,
            EventType::PrMerged => self.prs_merged += 1,
            EventType::DeploymentStarted => self.deployments_started += 1,
            EventType::DeploymentCompleted => self.deployments_completed += 1,
            EventType::DeploymentFailed => self.deployments_failed += 1,
            EventType::ContextWindowUpdated => {
                self.context_window_percent =
                    data.get("context_window_percent").and_then(|v| v.as_f64());
            }
            EventType::CheckpointCreated => {
                self.checkpoints_created += 1;
                self.last_checkpoint_id = str_field("checkpoint_id");
            }
            EventType::CheckpointLoaded => {
                self.last_checkpoint_id = str_field("checkpoint_id");
            }
            EventType::EpicPlanned => self.epics_planned += 1,
            EventType::FeatureRequested => self.features_requested += 1,
            EventType::TaskSpawned => self.tasks_spawned += 1,
        }

        self.last_sequence = event.sequence_num;
    }

    /// Serialize into a work-state payload
    pub fn to_work_state(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Pure fold over events in ascending sequence order
pub fn fold_events(events: &[EventRecord]) -> ReplayState {
    let mut state = ReplayState::default();
    for event in events {
        state.apply(event);
    }
    state
}

/// Append-only event store service
pub struct EventService<S: KernelStore> {
    store: Arc<S>,
    locks: Arc<InstanceLocks>,
}

impl<S: KernelStore> EventService<S> {
    pub fn new(store: Arc<S>, locks: Arc<InstanceLocks>) -> Self {
        Self { store, locks }
    }

    /// Append an event, allocating the next per-instance sequence number
    ///
    /// Validates the payload against the type registry before touching the
    /// store. Appends on the same instance are serialized.
    #[instrument(skip(self, event_data, metadata))]
    pub async fn append(
        &self,
        instance_id: &str,
        event_type: EventType,
        event_data: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> Result<AppendedEvent, KernelError> {
        event_type.validate_payload(&event_data)?;

        let lock = self.locks.for_instance(instance_id);
        let _guard = lock.lock().await;

        let event = self
            .store
            .append_event(instance_id, event_type, event_data, metadata, Utc::now())
            .await?;

        debug!(%instance_id, %event_type, sequence_num = event.sequence_num, "event appended");
        Ok(AppendedEvent {
            event_id: event.event_id,
            sequence_num: event.sequence_num,
            timestamp: event.timestamp,
        })
    }

    /// Query events newest-first
    #[instrument(skip(self, filter))]
    pub async fn query(
        &self,
        instance_id: &str,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventPage, KernelError> {
        let page = self
            .store
            .query_events(instance_id, filter, pagination)
            .await?;
        let has_more = page.has_more(pagination);
        Ok(EventPage {
            events: page.items,
            total: page.total,
            has_more,
        })
    }

    /// Deterministic replay of an instance's event log
    ///
    /// Folds events in ascending sequence order, optionally stopping at
    /// `up_to_sequence`.
    #[instrument(skip(self))]
    pub async fn replay(
        &self,
        instance_id: &str,
        up_to_sequence: Option<i64>,
    ) -> Result<ReplayState, KernelError> {
        let events = self
            .store
            .load_events(instance_id, None, up_to_sequence)
            .await?;
        Ok(fold_events(&events))
    }

    /// Replay only the events after a checkpoint's sequence
    pub async fn replay_after(
        &self,
        instance_id: &str,
        after_sequence: i64,
    ) -> Result<(ReplayState, usize), KernelError> {
        let events = self
            .store
            .load_events(instance_id, Some(after_sequence), None)
            .await?;
        Ok((fold_events(&events), events.len()))
    }

    /// Highest allocated sequence number (0 when the log is empty)
    pub async fn max_sequence(&self, instance_id: &str) -> Result<i64, KernelError> {
        Ok(self.store.max_sequence(instance_id).await?)
    }

    /// The closed event-type registry
    pub fn list_event_types(&self) -> Vec<EventTypeDefinition> {
        EventType::all()
            .iter()
            .map(|t| EventTypeDefinition::for_type(*t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use warden_core::instance::{generate_instance_id, Instance, InstanceStatus, InstanceType};
    use warden_storage::InMemoryKernelStore;

    async fn service_with_instance() -> (EventService<InMemoryKernelStore>, String) {
        let store = Arc::new(InMemoryKernelStore::new());
        let instance = Instance {
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
        };
        let id = instance.instance_id.clone();
        store.insert_instance(instance).await.unwrap();
        let service = EventService::new(store, Arc::new(InstanceLocks::new()));
        (service, id)
    }

    #[tokio::test]
    async fn test_append_validates_payload() {
        let (service, id) = service_with_instance().await;

        let result = service
            .append(&id, EventType::TestStarted, json!({"wrong": 1}), None)
            .await;
        assert!(matches!(result, Err(KernelError::Validation(_))));

        let appended = service
            .append(&id, EventType::TestStarted, json!({"test_id": "T1"}), None)
            .await
            .unwrap();
        assert_eq!(appended.sequence_num, 1);
    }

    #[tokio::test]
    async fn test_sequences_are_gap_free_under_concurrency() {
        let (service, id) = service_with_instance().await;
        let service = Arc::new(service);

        let mut handles = Vec::new();
        for i in 0..20 {
            let service = service.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                service
                    .append(
                        &id,
                        EventType::TaskSpawned,
                        json!({"task_id": format!("task-{i}")}),
                        None,
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut sequences: Vec<i64> = Vec::new();
        for handle in handles {
            sequences.push(handle.await.unwrap().sequence_num);
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_query_newest_first_matches_append_order() {
        let (service, id) = service_with_instance().await;

        for i in 0..4 {
            service
                .append(
                    &id,
                    EventType::CommitCreated,
                    json!({"sha": format!("sha-{i}")}),
                    None,
                )
                .await
                .unwrap();
        }

        let page = service
            .query(
                &id,
                EventFilter {
                    event_types: vec![EventType::CommitCreated],
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();

        assert_eq!(page.total, 4);
        assert!(!page.has_more);
        let mut sequences: Vec<i64> = page.events.iter().map(|e| e.sequence_num).collect();
        // Newest first; reversing recovers append order
        sequences.reverse();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_replay_fold_is_deterministic() {
        let (service, id) = service_with_instance().await;

        service
            .append(
                &id,
                EventType::InstanceRegistered,
                json!({"project": "checkout", "instance_type": "PS"}),
                None,
            )
            .await
            .unwrap();
        service
            .append(&id, EventType::EpicStarted, json!({"epic_id": "E1"}), None)
            .await
            .unwrap();
        service
            .append(&id, EventType::TestStarted, json!({"test_id": "T1"}), None)
            .await
            .unwrap();
        service
            .append(&id, EventType::TestPassed, json!({"test_id": "T1"}), None)
            .await
            .unwrap();
        service
            .append(&id, EventType::EpicCompleted, json!({"epic_id": "E1"}), None)
            .await
            .unwrap();

        let state = service.replay(&id, None).await.unwrap();
        assert!(state.registered);
        assert_eq!(state.project.as_deref(), Some("checkout"));
        assert_eq!(state.current_epic, None);
        assert_eq!(state.completed_epics, vec!["E1"]);
        assert_eq!(state.tests_started, 1);
        assert_eq!(state.tests_passed, 1);
        assert_eq!(state.last_sequence, 5);

        // Replaying twice yields the same accumulator
        let again = service.replay(&id, None).await.unwrap();
        assert_eq!(state, again);

        // Partial replay stops at the requested sequence
        let partial = service.replay(&id, Some(2)).await.unwrap();
        assert_eq!(partial.current_epic.as_deref(), Some("E1"));
        assert_eq!(partial.completed_epics.len(), 0);
        assert_eq!(partial.last_sequence, 2);
    }

    #[tokio::test]
    async fn test_replay_after_folds_only_the_tail() {
        let (service, id) = service_with_instance().await;

        service
            .append(&id, EventType::TestPassed, json!({"test_id": "T1"}), None)
            .await
            .unwrap();
        service
            .append(&id, EventType::TestPassed, json!({"test_id": "T2"}), None)
            .await
            .unwrap();
        service
            .append(&id, EventType::TestFailed, json!({"test_id": "T3"}), None)
            .await
            .unwrap();

        let (tail, count) = service.replay_after(&id, 2).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(tail.tests_failed, 1);
        assert_eq!(tail.tests_passed, 0);
        assert_eq!(tail.last_sequence, 3);
    }

    #[tokio::test]
    async fn test_list_event_types_is_closed_registry() {
        let (service, _) = service_with_instance().await;
        let definitions = service.list_event_types();
        assert_eq!(definitions.len(), EventType::all().len());
        assert!(definitions.iter().any(|d| d.name == "instance_stale"));
        assert!(definitions.iter().any(|d| d.name == "task_spawned"));
    }
}
