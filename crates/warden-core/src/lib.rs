// Core domain types for the Warden kernel
// Decision: This crate has NO dependency on storage or the runtime - it's purely domain types
// Decision: The state machine transition table, redactor, and reporter live here so they are
//           testable without tokio or a database

pub mod checkpoint;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod instance;
pub mod redact;
pub mod report;
pub mod result;
pub mod stage;
pub mod workflow;

pub use checkpoint::{
    validate_context_percent, Checkpoint, CheckpointType, ReconstructedState, ReconstructionSource,
};
pub use command::{CommandEntry, CommandStats, CommandType, NewCommandEntry};
pub use config::{KernelConfig, StageTimeouts};
pub use error::{ErrorKind, KernelError};
pub use event::{EventCategory, EventRecord, EventType, EventTypeDefinition};
pub use instance::{generate_instance_id, Instance, InstanceStatus, InstanceType};
pub use redact::{Redactor, DEFAULT_PATTERNS, REDACTED, SENSITIVE_KEYS};
pub use report::{epic_report, report, EpicTestReport, Recommendation, StageSummary, TestReport};
pub use result::{
    CrossValidation, DetectionResult, Evidence, FixResult, LearningResult, Pattern,
    PreviousResults, RedFlag, StageResult, TestExecutionResult, VerificationReport,
};
pub use stage::{Stage, TestType, WorkflowStatus};
pub use workflow::{TestDefinition, Workflow, WorkflowTransition};
