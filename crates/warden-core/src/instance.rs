//! Supervisor instances
//!
//! An instance is a single long-running supervisor session. Instances are
//! registered once, kept alive by heartbeats, swept to `stale` when the
//! heartbeat age exceeds the threshold, and closed explicitly. Rows are
//! never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of supervisor an instance runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceType {
    /// Primary supervisor
    Ps,
    /// Monitoring supervisor
    Ms,
}

impl InstanceType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PS" => Some(Self::Ps),
            "MS" => Some(Self::Ms),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ps => write!(f, "PS"),
            Self::Ms => write!(f, "MS"),
        }
    }
}

/// Liveness status of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Stale,
    Closed,
}

impl InstanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "stale" => Some(Self::Stale),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Stale => write!(f, "stale"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A single long-running supervisor session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Short opaque identifier, unique across all instances
    pub instance_id: String,

    pub project: String,
    pub instance_type: InstanceType,
    pub status: InstanceStatus,

    pub registration_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,

    /// Context window usage in [0, 100]
    pub context_window_percent: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_epic: Option<String>,

    /// External transcript identifier, if a transcript session is attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claude_session_uuid: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Instance {
    /// Age of the last heartbeat relative to `now`
    pub fn heartbeat_age_seconds(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_heartbeat).num_seconds()
    }

    /// Whether a sweep at `now` with the given threshold would mark this stale
    pub fn is_stale_at(&self, now: DateTime<Utc>, stale_threshold_seconds: u64) -> bool {
        self.status == InstanceStatus::Active
            && self.heartbeat_age_seconds(now) >= stale_threshold_seconds as i64
    }
}

/// Generate a short opaque instance id from a time-ordered UUID
///
/// Twelve hex characters keeps ids prefix-resolvable while staying short
/// enough to type.
pub fn generate_instance_id() -> String {
    let uuid = Uuid::now_v7();
    uuid.simple().to_string()[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_generated_id_shape() {
        let id = generate_instance_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_staleness_threshold() {
        let mut instance = sample_instance();
        let now = Utc::now();
        instance.last_heartbeat = now - chrono::Duration::seconds(200);

        assert!(instance.is_stale_at(now, 120));
        assert!(!instance.is_stale_at(now, 300));
    }

    #[test]
    fn test_closed_instance_never_stale() {
        let mut instance = sample_instance();
        let now = Utc::now();
        instance.status = InstanceStatus::Closed;
        instance.last_heartbeat = now - chrono::Duration::seconds(10_000);

        assert!(!instance.is_stale_at(now, 120));
    }

    #[test]
    fn test_instance_type_wire_form() {
        assert_eq!(serde_json::to_string(&InstanceType::Ps).unwrap(), "\"PS\"");
        assert_eq!(InstanceType::parse("MS"), Some(InstanceType::Ms));
        assert_eq!(InstanceType::parse("ms"), None);
    }
}
