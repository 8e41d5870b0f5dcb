//! # Warden Kernel
//!
//! The workflow & session kernel for supervised test pipelines.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   SupervisorScheduler                        │
//! │  (parallel workflows, stale sweep, cooperative cancel)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   WorkflowOrchestrator                       │
//! │  (stage loop, routing policy, retry/escalation delegation)  │
//! └─────────────────────────────────────────────────────────────┘
//!            │                  │                   │
//!            ▼                  ▼                   ▼
//! ┌──────────────────┐ ┌────────────────┐ ┌────────────────────┐
//! │ WorkflowState-   │ │ StageExecutor  │ │ EventService /     │
//! │ Machine          │ │ (collaborators,│ │ CommandLogService  │
//! │ (validated       │ │  timeouts,     │ │ (append-only log,  │
//! │  transitions)    │ │  cancellation) │ │  redaction)        │
//! └──────────────────┘ └────────────────┘ └────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       KernelStore                            │
//! │  (PostgreSQL in production, in-memory in tests)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Alongside the pipeline, the [`registry::InstanceRegistry`] keeps
//! supervisor instances alive (heartbeat, staleness, resume resolution)
//! and the [`checkpoints::CheckpointManager`] snapshots and reconstructs
//! per-instance work-state.

pub mod checkpoints;
pub mod collaborators;
pub mod commands;
pub mod errors;
pub mod events;
pub mod executor;
pub mod handoff;
pub mod kernel;
pub mod locks;
pub mod machine;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;

/// Prelude for common imports
pub mod prelude {
    pub use crate::checkpoints::CheckpointManager;
    pub use crate::collaborators::{
        CollaboratorError, Collaborators, FixAgent, IndependentVerifier, LearningExtractor,
        PatternLearningExtractor, RedFlagDetector, StageContext, TestRunner,
    };
    pub use crate::commands::CommandLogService;
    pub use crate::errors::{ErrorDecision, ErrorHandler};
    pub use crate::events::{AppendedEvent, EventPage, EventService, ReplayState};
    pub use crate::executor::{StageExecutor, StageOutcome};
    pub use crate::handoff::{EscalationHandoff, HandoffSink};
    pub use crate::kernel::Kernel;
    pub use crate::machine::WorkflowStateMachine;
    pub use crate::orchestrator::{WorkflowOrchestrator, WorkflowResult};
    pub use crate::registry::{InstanceRegistry, Resolution, ResolutionStrategy};
    pub use crate::scheduler::SupervisorScheduler;
}

// Re-export key types at crate root
pub use checkpoints::CheckpointManager;
pub use collaborators::{
    CollaboratorError, Collaborators, FixAgent, IndependentVerifier, LearningExtractor,
    PatternLearningExtractor, RedFlagDetector, StageContext, TestRunner,
};
pub use commands::CommandLogService;
pub use errors::{ErrorDecision, ErrorHandler};
pub use events::{fold_events, AppendedEvent, EventPage, EventService, ReplayState};
pub use executor::{StageExecutor, StageOutcome, CANCELLED_ERROR, TIMEOUT_ERROR};
pub use handoff::{EscalationHandoff, HandoffSink};
pub use kernel::Kernel;
pub use locks::InstanceLocks;
pub use machine::WorkflowStateMachine;
pub use orchestrator::{WorkflowOrchestrator, WorkflowResult, WORKFLOW_TIMEOUT_ERROR};
pub use registry::{InstanceRegistry, Resolution, ResolutionStrategy};
pub use scheduler::SupervisorScheduler;
