//! Checkpoint manager
//!
//! Snapshots an instance's work-state pinned to its event sequence, and
//! reconstructs work-state after a restart from the best available source:
//! checkpoint, event replay, command heuristic, or the bare registry row.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use warden_core::checkpoint::{
    validate_context_percent, Checkpoint, CheckpointType, ReconstructedState,
    ReconstructionSource,
};
use warden_core::error::KernelError;
use warden_core::event::EventType;
use warden_storage::{CommandFilter, KernelStore, Pagination};

use crate::events::EventService;
use crate::locks::InstanceLocks;

/// Checkpoint creation and work-state reconstruction
pub struct CheckpointManager<S: KernelStore> {
    store: Arc<S>,
    events: Arc<EventService<S>>,
    locks: Arc<InstanceLocks>,
    context_threshold_percent: f64,
}

impl<S: KernelStore> CheckpointManager<S> {
    pub fn new(
        store: Arc<S>,
        events: Arc<EventService<S>>,
        locks: Arc<InstanceLocks>,
        context_threshold_percent: f64,
    ) -> Self {
        Self {
            store,
            events,
            locks,
            context_threshold_percent,
        }
    }

    /// Write a checkpoint referencing the instance's current event sequence
    #[instrument(skip(self, work_state))]
    pub async fn create(
        &self,
        instance_id: &str,
        checkpoint_type: CheckpointType,
        work_state: serde_json::Value,
        context_percent: f64,
        reason: &str,
    ) -> Result<Checkpoint, KernelError> {
        validate_context_percent(context_percent)?;

        // Sequence read and insert are serialized with event appends so the
        // snapshot cannot reference a sequence from the middle of a write.
        let checkpoint = {
            let lock = self.locks.for_instance(instance_id);
            let _guard = lock.lock().await;

            let sequence_num = self.store.max_sequence(instance_id).await?;
            let checkpoint = Checkpoint {
                checkpoint_id: Uuid::now_v7(),
                instance_id: instance_id.to_string(),
                checkpoint_type,
                sequence_num,
                timestamp: Utc::now(),
                context_window_percent: context_percent,
                work_state,
                metadata: Some(json!({"reason": reason})),
            };
            self.store.insert_checkpoint(checkpoint.clone()).await?;
            checkpoint
        };

        self.events
            .append(
                instance_id,
                EventType::CheckpointCreated,
                json!({
                    "checkpoint_id": checkpoint.checkpoint_id,
                    "checkpoint_type": checkpoint.checkpoint_type.to_string(),
                    "sequence_num": checkpoint.sequence_num,
                }),
                None,
            )
            .await?;

        info!(%instance_id, checkpoint_id = %checkpoint.checkpoint_id,
              sequence_num = checkpoint.sequence_num, "checkpoint created");
        Ok(checkpoint)
    }

    /// Checkpoint automatically when context usage crosses the threshold
    ///
    /// Fires once per crossing: skipped while a checkpoint already covers
    /// the instance's current event sequence.
    #[instrument(skip(self, work_state))]
    pub async fn maybe_checkpoint_on_context(
        &self,
        instance_id: &str,
        context_percent: f64,
        work_state: serde_json::Value,
    ) -> Result<Option<Checkpoint>, KernelError> {
        validate_context_percent(context_percent)?;
        if context_percent < self.context_threshold_percent {
            return Ok(None);
        }

        if let Some(latest) = self.store.latest_checkpoint(instance_id).await? {
            if self
                .work_events_after(instance_id, latest.sequence_num)
                .await?
                == 0
            {
                return Ok(None);
            }
        }

        let checkpoint = self
            .create(
                instance_id,
                CheckpointType::ContextWindow,
                work_state,
                context_percent,
                "context window threshold crossed",
            )
            .await?;
        Ok(Some(checkpoint))
    }

    /// Checkpoint on epic completion
    pub async fn checkpoint_on_epic_completion(
        &self,
        instance_id: &str,
        epic_id: &str,
        work_state: serde_json::Value,
        context_percent: f64,
    ) -> Result<Checkpoint, KernelError> {
        self.create(
            instance_id,
            CheckpointType::EpicCompletion,
            work_state,
            context_percent,
            &format!("epic {epic_id} completed"),
        )
        .await
    }

    /// Most recent checkpoint, if any
    pub async fn latest(&self, instance_id: &str) -> Result<Option<Checkpoint>, KernelError> {
        Ok(self.store.latest_checkpoint(instance_id).await?)
    }

    /// Load a checkpoint by id, recording the load on the owning instance
    ///
    /// Loading never mutates the checkpoint; only a `checkpoint_loaded`
    /// event is appended.
    #[instrument(skip(self))]
    pub async fn load(&self, checkpoint_id: Uuid) -> Result<Checkpoint, KernelError> {
        let checkpoint = self.store.get_checkpoint(checkpoint_id).await?;
        self.events
            .append(
                &checkpoint.instance_id,
                EventType::CheckpointLoaded,
                json!({"checkpoint_id": checkpoint.checkpoint_id}),
                None,
            )
            .await?;
        Ok(checkpoint)
    }

    /// Events after a sequence, ignoring checkpoint bookkeeping events
    async fn work_events_after(
        &self,
        instance_id: &str,
        after_sequence: i64,
    ) -> Result<usize, KernelError> {
        let events = self
            .store
            .load_events(instance_id, Some(after_sequence), None)
            .await?;
        Ok(events
            .iter()
            .filter(|e| {
                !matches!(
                    e.event_type,
                    EventType::CheckpointCreated | EventType::CheckpointLoaded
                )
            })
            .count())
    }

    /// Reconstruct work-state from the highest-confidence source available
    #[instrument(skip(self))]
    pub async fn reconstruct(&self, instance_id: &str) -> Result<ReconstructedState, KernelError> {
        // CHECKPOINT: snapshot as written; extra confidence when no work
        // has landed since.
        if let Some(checkpoint) = self.store.latest_checkpoint(instance_id).await? {
            let events_after = self
                .work_events_after(instance_id, checkpoint.sequence_num)
                .await?;
            let confidence = if events_after == 0 { 0.95 } else { 0.9 };
            debug!(%instance_id, source = "checkpoint", events_after, "reconstructed work-state");
            return Ok(ReconstructedState {
                work_state: checkpoint.work_state,
                source: ReconstructionSource::Checkpoint,
                confidence,
            });
        }

        // EVENTS: replay the whole log
        let max_sequence = self.events.max_sequence(instance_id).await?;
        if max_sequence > 0 {
            let state = self.events.replay(instance_id, None).await?;
            return Ok(ReconstructedState {
                work_state: state.to_work_state(),
                source: ReconstructionSource::Events,
                confidence: 0.7,
            });
        }

        // COMMANDS: heuristic over recent entries
        let commands = self
            .store
            .search_commands(
                CommandFilter {
                    instance_id: Some(instance_id.to_string()),
                    ..Default::default()
                },
                Pagination {
                    offset: 0,
                    limit: 20,
                },
            )
            .await?;
        if !commands.items.is_empty() {
            let recent_actions: Vec<&str> =
                commands.items.iter().map(|c| c.action.as_str()).collect();
            let last = &commands.items[0];
            return Ok(ReconstructedState {
                work_state: json!({
                    "last_action": last.action,
                    "last_command_at": last.timestamp,
                    "last_command_success": last.success,
                    "recent_actions": recent_actions,
                }),
                source: ReconstructionSource::Commands,
                confidence: 0.4,
            });
        }

        // BASIC: registry row only
        let instance = self.store.get_instance(instance_id).await?;
        Ok(ReconstructedState {
            work_state: json!({
                "project": instance.project,
                "instance_type": instance.instance_type.to_string(),
                "status": instance.status.to_string(),
                "current_epic": instance.current_epic,
            }),
            source: ReconstructionSource::Basic,
            confidence: 0.2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::command::{CommandType, NewCommandEntry};
    use warden_core::instance::{generate_instance_id, Instance, InstanceStatus, InstanceType};
    use warden_storage::InMemoryKernelStore;

    struct Fixture {
        store: Arc<InMemoryKernelStore>,
        events: Arc<EventService<InMemoryKernelStore>>,
        manager: CheckpointManager<InMemoryKernelStore>,
        instance_id: String,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryKernelStore::new());
        let locks = Arc::new(InstanceLocks::new());
        let events = Arc::new(EventService::new(store.clone(), locks.clone()));
        let manager = CheckpointManager::new(store.clone(), events.clone(), locks, 80.0);

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
        let instance_id = instance.instance_id.clone();
        store.insert_instance(instance).await.unwrap();

        Fixture {
            store,
            events,
            manager,
            instance_id,
        }
    }

    async fn emit_n(fixture: &Fixture, n: usize) {
        for i in 0..n {
            fixture
                .events
                .append(
                    &fixture.instance_id,
                    EventType::TestStarted,
                    json!({"test_id": format!("T{i}")}),
                    None,
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_create_pins_current_sequence_and_emits() {
        let fixture = fixture().await;
        emit_n(&fixture, 3).await;

        let checkpoint = fixture
            .manager
            .create(
                &fixture.instance_id,
                CheckpointType::Manual,
                json!({"epic": "E1"}),
                40.0,
                "operator request",
            )
            .await
            .unwrap();

        assert_eq!(checkpoint.sequence_num, 3);

        let events = fixture
            .store
            .load_events(&fixture.instance_id, None, None)
            .await
            .unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::CheckpointCreated);
        assert_eq!(last.sequence_num, 4);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_percent() {
        let fixture = fixture().await;
        let result = fixture
            .manager
            .create(
                &fixture.instance_id,
                CheckpointType::Manual,
                json!({}),
                130.0,
                "x",
            )
            .await;
        assert!(matches!(result, Err(KernelError::Validation(_))));
    }

    #[tokio::test]
    async fn test_context_policy_fires_once_per_crossing() {
        let fixture = fixture().await;
        emit_n(&fixture, 2).await;

        let below = fixture
            .manager
            .maybe_checkpoint_on_context(&fixture.instance_id, 50.0, json!({}))
            .await
            .unwrap();
        assert!(below.is_none());

        let first = fixture
            .manager
            .maybe_checkpoint_on_context(&fixture.instance_id, 85.0, json!({"epic": "E1"}))
            .await
            .unwrap();
        assert!(first.is_some());

        // No new events since the checkpoint: policy does not fire again
        let second = fixture
            .manager
            .maybe_checkpoint_on_context(&fixture.instance_id, 90.0, json!({"epic": "E1"}))
            .await
            .unwrap();
        assert!(second.is_none());

        // After more events the policy may checkpoint again
        emit_n(&fixture, 1).await;
        let third = fixture
            .manager
            .maybe_checkpoint_on_context(&fixture.instance_id, 92.0, json!({"epic": "E1"}))
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn test_load_emits_event_without_mutation() {
        let fixture = fixture().await;
        emit_n(&fixture, 1).await;

        let checkpoint = fixture
            .manager
            .create(
                &fixture.instance_id,
                CheckpointType::Manual,
                json!({"epic": "E1"}),
                10.0,
                "x",
            )
            .await
            .unwrap();

        let loaded = fixture.manager.load(checkpoint.checkpoint_id).await.unwrap();
        assert_eq!(loaded, checkpoint);

        let events = fixture
            .store
            .load_events(&fixture.instance_id, None, None)
            .await
            .unwrap();
        assert_eq!(
            events.last().unwrap().event_type,
            EventType::CheckpointLoaded
        );
    }

    #[tokio::test]
    async fn test_reconstruct_prefers_checkpoint() {
        let fixture = fixture().await;
        emit_n(&fixture, 3).await;
        fixture
            .manager
            .create(
                &fixture.instance_id,
                CheckpointType::Manual,
                json!({"epic": "E1"}),
                40.0,
                "x",
            )
            .await
            .unwrap();

        let state = fixture
            .manager
            .reconstruct(&fixture.instance_id)
            .await
            .unwrap();
        assert_eq!(state.source, ReconstructionSource::Checkpoint);
        assert_eq!(state.work_state, json!({"epic": "E1"}));
        assert!(state.confidence >= 0.9);
    }

    #[tokio::test]
    async fn test_reconstruct_from_events_without_checkpoint() {
        let fixture = fixture().await;
        emit_n(&fixture, 2).await;

        let state = fixture
            .manager
            .reconstruct(&fixture.instance_id)
            .await
            .unwrap();
        assert_eq!(state.source, ReconstructionSource::Events);
        assert!(state.confidence >= 0.7);
        assert_eq!(state.work_state["tests_started"], json!(2));
    }

    #[tokio::test]
    async fn test_reconstruct_from_commands_then_basic() {
        let fixture = fixture().await;

        // No events, no checkpoints, no commands: registry row only
        let state = fixture
            .manager
            .reconstruct(&fixture.instance_id)
            .await
            .unwrap();
        assert_eq!(state.source, ReconstructionSource::Basic);
        assert!(state.confidence >= 0.2);
        assert_eq!(state.work_state["project"], json!("checkout"));

        // With a command on record the heuristic tier wins
        fixture
            .store
            .insert_command(
                NewCommandEntry::new(
                    fixture.instance_id.clone(),
                    CommandType::Auto,
                    "run_stage",
                    true,
                ),
                Utc::now(),
            )
            .await
            .unwrap();

        let state = fixture
            .manager
            .reconstruct(&fixture.instance_id)
            .await
            .unwrap();
        assert_eq!(state.source, ReconstructionSource::Commands);
        assert!(state.confidence >= 0.4);
        assert_eq!(state.work_state["last_action"], json!("run_stage"));
    }
}
