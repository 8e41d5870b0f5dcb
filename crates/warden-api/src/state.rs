//! Shared API state
//!
//! The admin surface exposes the kernel's services; workflow execution
//! itself runs in supervisor processes, so no orchestrator or collaborators
//! are wired here.

use std::sync::Arc;

use warden_core::config::KernelConfig;
use warden_core::redact::Redactor;
use warden_kernel::{
    CheckpointManager, CommandLogService, EventService, InstanceLocks, InstanceRegistry,
    WorkflowStateMachine,
};
use warden_storage::PostgresKernelStore;

/// App state shared across routes
#[derive(Clone)]
pub struct ApiState {
    pub config: KernelConfig,
    pub events: Arc<EventService<PostgresKernelStore>>,
    pub commands: Arc<CommandLogService<PostgresKernelStore>>,
    pub registry: Arc<InstanceRegistry<PostgresKernelStore>>,
    pub checkpoints: Arc<CheckpointManager<PostgresKernelStore>>,
    pub machine: Arc<WorkflowStateMachine<PostgresKernelStore>>,
}

impl ApiState {
    pub fn new(store: Arc<PostgresKernelStore>, config: KernelConfig) -> Self {
        let redactor = Arc::new(match &config.redaction_pattern_file {
            Some(path) => Redactor::from_pattern_file(path),
            None => Redactor::with_default_patterns(),
        });

        let locks = Arc::new(InstanceLocks::new());
        let events = Arc::new(EventService::new(store.clone(), locks.clone()));
        let commands = Arc::new(CommandLogService::new(
            store.clone(),
            redactor,
            locks.clone(),
        ));
        let registry = Arc::new(InstanceRegistry::new(
            store.clone(),
            events.clone(),
            config.stale_threshold,
        ));
        let checkpoints = Arc::new(CheckpointManager::new(
            store.clone(),
            events.clone(),
            locks,
            config.checkpoint_context_threshold_percent,
        ));
        let machine = Arc::new(WorkflowStateMachine::new(store));

        Self {
            config,
            events,
            commands,
            registry,
            checkpoints,
            machine,
        }
    }
}
