//! The closed event-type registry
//!
//! Event types are part of the schema: appending or replaying an unknown
//! type is a validation error, and adding a type is a schema change. Each
//! type declares the payload fields it requires, which `validate_payload`
//! enforces on append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KernelError;

/// Category an event type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Instance,
    Epic,
    Testing,
    Git,
    Deployment,
    WorkState,
    Planning,
}

/// The closed set of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // instance
    InstanceRegistered,
    InstanceHeartbeat,
    InstanceStale,
    // epic
    EpicStarted,
    EpicCompleted,
    EpicFailed,
    // testing
    TestStarted,
    TestPassed,
    TestFailed,
    ValidationPassed,
    ValidationFailed,
    // git
    CommitCreated,
    PrCreated,
    PrMerged,
    // deployment
    DeploymentStarted,
    DeploymentCompleted,
    DeploymentFailed,
    // work state
    ContextWindowUpdated,
    CheckpointCreated,
    CheckpointLoaded,
    // planning
    EpicPlanned,
    FeatureRequested,
    TaskSpawned,
}

impl EventType {
    /// Every registered type, grouped by category order
    pub fn all() -> &'static [EventType] {
        use EventType::*;
        &[
            InstanceRegistered,
            InstanceHeartbeat,
            InstanceStale,
            EpicStarted,
            EpicCompleted,
            EpicFailed,
            TestStarted,
            TestPassed,
            TestFailed,
            ValidationPassed,
            ValidationFailed,
            CommitCreated,
            PrCreated,
            PrMerged,
            DeploymentStarted,
            DeploymentCompleted,
            DeploymentFailed,
            ContextWindowUpdated,
            CheckpointCreated,
            CheckpointLoaded,
            EpicPlanned,
            FeatureRequested,
            TaskSpawned,
        ]
    }

    pub fn category(&self) -> EventCategory {
        use EventType::*;
        match self {
            InstanceRegistered | InstanceHeartbeat | InstanceStale => EventCategory::Instance,
            EpicStarted | EpicCompleted | EpicFailed => EventCategory::Epic,
            TestStarted | TestPassed | TestFailed | ValidationPassed | ValidationFailed => {
                EventCategory::Testing
            }
            CommitCreated | PrCreated | PrMerged => EventCategory::Git,
            DeploymentStarted | DeploymentCompleted | DeploymentFailed => EventCategory::Deployment,
            ContextWindowUpdated | CheckpointCreated | CheckpointLoaded => EventCategory::WorkState,
            EpicPlanned | FeatureRequested | TaskSpawned => EventCategory::Planning,
        }
    }

    /// Payload fields that must be present for this type
    pub fn required_fields(&self) -> &'static [&'static str] {
        use EventType::*;
        match self {
            InstanceRegistered => &["project", "instance_type"],
            InstanceHeartbeat => &[],
            InstanceStale => &["age_seconds"],
            EpicStarted | EpicCompleted | EpicFailed | EpicPlanned => &["epic_id"],
            TestStarted | TestPassed | TestFailed => &["test_id"],
            ValidationPassed | ValidationFailed => &["test_id"],
            CommitCreated => &["sha"],
            PrCreated | PrMerged => &["pr_number"],
            DeploymentStarted | DeploymentCompleted | DeploymentFailed => &["environment"],
            ContextWindowUpdated => &["context_window_percent"],
            CheckpointCreated | CheckpointLoaded => &["checkpoint_id"],
            FeatureRequested => &["feature"],
            TaskSpawned => &["task_id"],
        }
    }

    pub fn description(&self) -> &'static str {
        use EventType::*;
        match self {
            InstanceRegistered => "Supervisor instance registered",
            InstanceHeartbeat => "Instance liveness heartbeat",
            InstanceStale => "Instance heartbeat exceeded the stale threshold",
            EpicStarted => "Work on an epic started",
            EpicCompleted => "Epic finished successfully",
            EpicFailed => "Epic terminated with failure",
            TestStarted => "Test execution started",
            TestPassed => "Test execution passed",
            TestFailed => "Test execution failed",
            ValidationPassed => "Independent validation passed",
            ValidationFailed => "Independent validation failed",
            CommitCreated => "Commit created",
            PrCreated => "Pull request opened",
            PrMerged => "Pull request merged",
            DeploymentStarted => "Deployment started",
            DeploymentCompleted => "Deployment completed",
            DeploymentFailed => "Deployment failed",
            ContextWindowUpdated => "Context window usage changed",
            CheckpointCreated => "Work-state checkpoint written",
            CheckpointLoaded => "Work-state checkpoint loaded",
            EpicPlanned => "Epic planned",
            FeatureRequested => "Feature requested",
            TaskSpawned => "Sub-task spawned",
        }
    }

    /// Parse the snake_case wire form, rejecting unknown types
    pub fn parse(s: &str) -> Result<EventType, KernelError> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| KernelError::Validation(format!("unknown event type: {s}")))
    }

    pub fn as_str(&self) -> &'static str {
        use EventType::*;
        match self {
            InstanceRegistered => "instance_registered",
            InstanceHeartbeat => "instance_heartbeat",
            InstanceStale => "instance_stale",
            EpicStarted => "epic_started",
            EpicCompleted => "epic_completed",
            EpicFailed => "epic_failed",
            TestStarted => "test_started",
            TestPassed => "test_passed",
            TestFailed => "test_failed",
            ValidationPassed => "validation_passed",
            ValidationFailed => "validation_failed",
            CommitCreated => "commit_created",
            PrCreated => "pr_created",
            PrMerged => "pr_merged",
            DeploymentStarted => "deployment_started",
            DeploymentCompleted => "deployment_completed",
            DeploymentFailed => "deployment_failed",
            ContextWindowUpdated => "context_window_updated",
            CheckpointCreated => "checkpoint_created",
            CheckpointLoaded => "checkpoint_loaded",
            EpicPlanned => "epic_planned",
            FeatureRequested => "feature_requested",
            TaskSpawned => "task_spawned",
        }
    }

    /// Validate an event payload against this type's requirements
    ///
    /// The payload must be a JSON object containing every required field.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), KernelError> {
        let object = payload.as_object().ok_or_else(|| {
            KernelError::Validation(format!(
                "event_data for {} must be an object",
                self.as_str()
            ))
        })?;

        for field in self.required_fields() {
            if !object.contains_key(*field) {
                return Err(KernelError::Validation(format!(
                    "event_data for {} missing required field '{field}'",
                    self.as_str()
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry entry describing an event type, returned by `list_event_types`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTypeDefinition {
    pub name: String,
    pub category: EventCategory,
    pub description: String,
    pub required_fields: Vec<String>,
}

impl EventTypeDefinition {
    pub fn for_type(event_type: EventType) -> Self {
        Self {
            name: event_type.as_str().to_string(),
            category: event_type.category(),
            description: event_type.description().to_string(),
            required_fields: event_type
                .required_fields()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// An immutable fact emitted for an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    pub instance_id: String,
    pub event_type: EventType,

    /// Monotonically increasing, gap-free per instance, starting at 1
    pub sequence_num: i64,

    pub timestamp: DateTime<Utc>,
    pub event_data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_is_closed() {
        assert_eq!(EventType::all().len(), 23);
        assert!(EventType::parse("instance_registered").is_ok());
        assert!(matches!(
            EventType::parse("instance_rebooted"),
            Err(KernelError::Validation(_))
        ));
    }

    #[test]
    fn test_as_str_roundtrip() {
        for event_type in EventType::all() {
            assert_eq!(EventType::parse(event_type.as_str()).unwrap(), *event_type);
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(EventType::TestPassed.category(), EventCategory::Testing);
        assert_eq!(EventType::PrMerged.category(), EventCategory::Git);
        assert_eq!(
            EventType::CheckpointCreated.category(),
            EventCategory::WorkState
        );
        assert_eq!(EventType::TaskSpawned.category(), EventCategory::Planning);
    }

    #[test]
    fn test_payload_validation() {
        let ok = json!({"test_id": "T1", "extra": true});
        assert!(EventType::TestStarted.validate_payload(&ok).is_ok());

        let missing = json!({"extra": true});
        assert!(matches!(
            EventType::TestStarted.validate_payload(&missing),
            Err(KernelError::Validation(_))
        ));

        let not_object = json!("T1");
        assert!(EventType::TestStarted.validate_payload(&not_object).is_err());
    }

    #[test]
    fn test_heartbeat_payload_may_be_empty() {
        assert!(EventType::InstanceHeartbeat
            .validate_payload(&json!({}))
            .is_ok());
    }

    #[test]
    fn test_definition_shape() {
        let definition = EventTypeDefinition::for_type(EventType::InstanceStale);
        assert_eq!(definition.name, "instance_stale");
        assert_eq!(definition.category, EventCategory::Instance);
        assert_eq!(definition.required_fields, vec!["age_seconds"]);
    }
}
