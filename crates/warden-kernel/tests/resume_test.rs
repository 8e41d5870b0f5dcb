//! Resume-after-stale: sweep, resolution, and work-state reconstruction

mod common;

use chrono::Utc;
use serde_json::json;

use warden_core::checkpoint::{CheckpointType, ReconstructionSource};
use warden_core::event::EventType;
use warden_core::instance::InstanceStatus;
use warden_storage::{HeartbeatUpdate, KernelStore};

use common::*;

#[tokio::test]
async fn scenario_resume_after_stale() {
    let fixture = test_kernel(
        ScriptedRunner::passing(),
        FixedDetector::clean(),
        ScriptedVerifier::verified(95.0),
        FixedFixer { success: true },
    )
    .await;
    let kernel = &fixture.kernel;
    let instance_id = &fixture.instance_id;

    // Three events on the log (registration already wrote sequence 1)
    kernel
        .events
        .append(instance_id, EventType::EpicStarted, json!({"epic_id": "E1"}), None)
        .await
        .unwrap();
    kernel
        .events
        .append(instance_id, EventType::TestStarted, json!({"test_id": "T1"}), None)
        .await
        .unwrap();
    assert_eq!(kernel.events.max_sequence(instance_id).await.unwrap(), 3);

    // Checkpoint pinned at sequence 3
    let checkpoint = kernel
        .checkpoints
        .create(
            instance_id,
            CheckpointType::Manual,
            json!({"epic": "E1"}),
            35.0,
            "pre-stale snapshot",
        )
        .await
        .unwrap();
    assert_eq!(checkpoint.sequence_num, 3);

    // Heartbeats stop for 200 seconds
    kernel
        .store
        .heartbeat_instance(
            instance_id,
            Utc::now() - chrono::Duration::seconds(200),
            HeartbeatUpdate::default(),
        )
        .await
        .unwrap();

    let swept = kernel.registry.mark_stale_sweep().await.unwrap();
    assert!(swept.contains(instance_id));
    assert_eq!(
        kernel.registry.get(instance_id).await.unwrap().status,
        InstanceStatus::Stale
    );

    // The stale event records the heartbeat age
    let events = kernel
        .store
        .load_events(instance_id, None, None)
        .await
        .unwrap();
    let stale_event = events
        .iter()
        .find(|e| e.event_type == EventType::InstanceStale)
        .expect("instance_stale event");
    assert!(stale_event.event_data["age_seconds"].as_i64().unwrap() >= 120);

    // Resume by exact id and reconstruct from the checkpoint
    match kernel.registry.resolve(instance_id).await.unwrap() {
        warden_kernel::Resolution::Resolved { instance, .. } => {
            assert_eq!(&instance.instance_id, instance_id);
        }
        other => panic!("expected resolution, got {other:?}"),
    }

    let state = kernel.checkpoints.reconstruct(instance_id).await.unwrap();
    assert_eq!(state.source, ReconstructionSource::Checkpoint);
    assert_eq!(state.work_state, json!({"epic": "E1"}));
    assert!(state.confidence >= 0.9);
}

#[tokio::test]
async fn reconstruction_falls_back_to_events_after_checkpointless_restart() {
    let fixture = test_kernel(
        ScriptedRunner::passing(),
        FixedDetector::clean(),
        ScriptedVerifier::verified(95.0),
        FixedFixer { success: true },
    )
    .await;
    let kernel = &fixture.kernel;
    let instance_id = &fixture.instance_id;

    kernel
        .events
        .append(instance_id, EventType::EpicStarted, json!({"epic_id": "E7"}), None)
        .await
        .unwrap();
    kernel
        .events
        .append(
            instance_id,
            EventType::ContextWindowUpdated,
            json!({"context_window_percent": 61.5}),
            None,
        )
        .await
        .unwrap();

    let state = kernel.checkpoints.reconstruct(instance_id).await.unwrap();
    assert_eq!(state.source, ReconstructionSource::Events);
    assert!(state.confidence >= 0.7);
    assert_eq!(state.work_state["current_epic"], json!("E7"));
    assert_eq!(state.work_state["context_window_percent"], json!(61.5));
    // Registration itself was replayed
    assert_eq!(state.work_state["registered"], json!(true));
    assert_eq!(state.work_state["project"], json!("checkout"));
}

#[tokio::test]
async fn heartbeat_after_sweep_reactivates_instance() {
    let fixture = test_kernel(
        ScriptedRunner::passing(),
        FixedDetector::clean(),
        ScriptedVerifier::verified(95.0),
        FixedFixer { success: true },
    )
    .await;
    let kernel = &fixture.kernel;
    let instance_id = &fixture.instance_id;

    kernel
        .store
        .heartbeat_instance(
            instance_id,
            Utc::now() - chrono::Duration::seconds(500),
            HeartbeatUpdate::default(),
        )
        .await
        .unwrap();
    kernel.registry.mark_stale_sweep().await.unwrap();
    assert_eq!(
        kernel.registry.get(instance_id).await.unwrap().status,
        InstanceStatus::Stale
    );

    let revived = kernel
        .registry
        .heartbeat(instance_id, Some(12.0), None)
        .await
        .unwrap();
    assert_eq!(revived.status, InstanceStatus::Active);
    assert_eq!(revived.context_window_percent, 12.0);
}
