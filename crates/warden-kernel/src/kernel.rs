//! Kernel wiring
//!
//! One explicit construction point for every service. The redactor and
//! configuration are built once at boot and shared immutably; there is no
//! global mutable state.

use std::sync::Arc;

use warden_core::config::KernelConfig;
use warden_core::redact::Redactor;
use warden_storage::KernelStore;

use crate::checkpoints::CheckpointManager;
use crate::collaborators::Collaborators;
use crate::commands::CommandLogService;
use crate::errors::ErrorHandler;
use crate::events::EventService;
use crate::executor::StageExecutor;
use crate::handoff::HandoffSink;
use crate::locks::InstanceLocks;
use crate::machine::WorkflowStateMachine;
use crate::orchestrator::WorkflowOrchestrator;
use crate::registry::InstanceRegistry;
use crate::scheduler::SupervisorScheduler;

/// Fully wired kernel services over one store
pub struct Kernel<S: KernelStore> {
    pub config: KernelConfig,
    pub store: Arc<S>,
    pub redactor: Arc<Redactor>,
    pub events: Arc<EventService<S>>,
    pub commands: Arc<CommandLogService<S>>,
    pub registry: Arc<InstanceRegistry<S>>,
    pub checkpoints: Arc<CheckpointManager<S>>,
    pub machine: Arc<WorkflowStateMachine<S>>,
    pub orchestrator: Arc<WorkflowOrchestrator<S>>,
}

impl<S: KernelStore> Kernel<S> {
    /// Wire every service from a store, a collaborator set, and a config
    pub fn new(store: Arc<S>, collaborators: Collaborators, config: KernelConfig) -> Self {
        let redactor = Arc::new(match &config.redaction_pattern_file {
            Some(path) => Redactor::from_pattern_file(path),
            None => Redactor::with_default_patterns(),
        });

        let locks = Arc::new(InstanceLocks::new());
        let events = Arc::new(EventService::new(store.clone(), locks.clone()));
        let commands = Arc::new(CommandLogService::new(
            store.clone(),
            redactor.clone(),
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
        let machine = Arc::new(WorkflowStateMachine::new(store.clone()));
        let executor = Arc::new(StageExecutor::new(
            collaborators,
            config.stage_timeouts.clone(),
        ));
        let error_handler = Arc::new(ErrorHandler::new(
            machine.clone(),
            HandoffSink::new(&config.handoff_dir),
            config.max_retries,
        ));
        let orchestrator = Arc::new(WorkflowOrchestrator::new(
            machine.clone(),
            executor,
            error_handler,
            events.clone(),
            commands.clone(),
            config.clone(),
        ));

        Self {
            config,
            store,
            redactor,
            events,
            commands,
            registry,
            checkpoints,
            machine,
            orchestrator,
        }
    }

    /// A scheduler bound to this kernel's orchestrator and registry
    pub fn scheduler(&self) -> SupervisorScheduler<S> {
        SupervisorScheduler::new(
            self.orchestrator.clone(),
            self.registry.clone(),
            &self.config,
        )
    }
}
