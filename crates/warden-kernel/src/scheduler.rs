//! Supervisor scheduler
//!
//! Runs many workflows concurrently under a permit limit, owns the
//! periodic stale sweep and the supervising instance's heartbeat loop, and
//! propagates cancellation into every running stage. Stages within one
//! workflow stay strictly sequential; concurrency exists only across
//! workflows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use warden_core::config::KernelConfig;
use warden_core::error::KernelError;
use warden_core::workflow::TestDefinition;
use warden_storage::KernelStore;

use crate::orchestrator::{WorkflowOrchestrator, WorkflowResult};
use crate::registry::InstanceRegistry;

/// Concurrency-bounded workflow scheduler with background maintenance loops
pub struct SupervisorScheduler<S: KernelStore> {
    orchestrator: Arc<WorkflowOrchestrator<S>>,
    registry: Arc<InstanceRegistry<S>>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    max_concurrent: usize,
    sweep_interval: Duration,
}

impl<S: KernelStore> SupervisorScheduler<S> {
    pub fn new(
        orchestrator: Arc<WorkflowOrchestrator<S>>,
        registry: Arc<InstanceRegistry<S>>,
        config: &KernelConfig,
    ) -> Self {
        let max_concurrent = config.max_concurrent_workflows.max(1);
        Self {
            orchestrator,
            registry,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            cancel: CancellationToken::new(),
            max_concurrent,
            sweep_interval: config.sweep_interval,
        }
    }

    /// Token cancelling every workflow and loop owned by this scheduler
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of permits currently free
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run a workflow when a permit frees up
    ///
    /// The returned handle resolves with the workflow's terminal result.
    #[instrument(skip(self, definition), fields(test_id = %definition.test_id))]
    pub fn spawn_workflow(
        &self,
        instance_id: String,
        definition: TestDefinition,
    ) -> JoinHandle<Result<WorkflowResult, KernelError>> {
        let orchestrator = self.orchestrator.clone();
        let semaphore = self.semaphore.clone();
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| KernelError::Cancelled)?;
            if cancel.is_cancelled() {
                return Err(KernelError::Cancelled);
            }
            orchestrator.run(&instance_id, definition, cancel).await
        })
    }

    /// Start the periodic stale sweep
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let cancel = self.cancel.clone();
        let interval = self.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match registry.mark_stale_sweep().await {
                            Ok(swept) if !swept.is_empty() => {
                                info!(count = swept.len(), "sweep marked instances stale");
                            }
                            Ok(_) => {}
                            Err(e) => error!("stale sweep failed: {e}"),
                        }
                    }
                }
            }
        })
    }

    /// Start the heartbeat loop for the supervising instance itself
    pub fn spawn_heartbeat(&self, instance_id: String, interval: Duration) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = registry.heartbeat(&instance_id, None, None).await {
                            warn!(%instance_id, "heartbeat failed: {e}");
                        }
                    }
                }
            }
        })
    }

    /// Cancel everything and wait for in-flight workflows to drain
    ///
    /// Returns `true` when all permits were reclaimed within the timeout.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!("scheduler shutting down");
        self.cancel.cancel();

        let drained = tokio::time::timeout(
            timeout,
            self.semaphore.acquire_many(self.max_concurrent as u32),
        )
        .await;

        match drained {
            Ok(Ok(permits)) => {
                drop(permits);
                info!("all workflows drained");
                true
            }
            Ok(Err(_)) => false,
            Err(_) => {
                warn!("shutdown timed out with workflows still running");
                false
            }
        }
    }
}
