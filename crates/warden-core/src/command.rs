//! Command log entries
//!
//! A command log entry is the sanitized record of a user-visible or
//! tool-visible command. Parameters and results are redacted before they
//! ever reach storage; retrieval always returns the redacted form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the command was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Invoked through an MCP tool endpoint
    McpTool,
    /// Issued explicitly by an operator
    Explicit,
    /// Issued automatically by the kernel
    Auto,
}

impl CommandType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mcp_tool" => Some(Self::McpTool),
            "explicit" => Some(Self::Explicit),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::McpTool => write!(f, "mcp_tool"),
            Self::Explicit => write!(f, "explicit"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Input for logging a command; redaction happens at the log boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommandEntry {
    pub instance_id: String,
    pub command_type: CommandType,
    pub action: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_data: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl NewCommandEntry {
    pub fn new(
        instance_id: impl Into<String>,
        command_type: CommandType,
        action: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            command_type,
            action: action.into(),
            tool_name: None,
            parameters: None,
            result: None,
            success,
            error_message: None,
            execution_time_ms: None,
            tags: Vec::new(),
            context_data: None,
            source: None,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_execution_time_ms(mut self, ms: u64) -> Self {
        self.execution_time_ms = Some(ms);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A persisted, redacted command log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEntry {
    /// Monotonic primary key
    pub id: i64,

    pub instance_id: String,
    pub command_type: CommandType,
    pub action: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Redacted structured payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,

    /// Redacted structured payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_data: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Per-instance command statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let entry = NewCommandEntry::new("abc123def456", CommandType::McpTool, "emit_event", true)
            .with_tool_name("emit_event")
            .with_parameters(json!({"event_type": "test_started"}))
            .with_execution_time_ms(12)
            .with_tags(vec!["kernel".into()])
            .with_source("orchestrator");

        assert_eq!(entry.action, "emit_event");
        assert_eq!(entry.tool_name.as_deref(), Some("emit_event"));
        assert_eq!(entry.execution_time_ms, Some(12));
        assert_eq!(entry.tags, vec!["kernel"]);
        assert!(entry.success);
    }

    #[test]
    fn test_command_type_roundtrip() {
        for t in [CommandType::McpTool, CommandType::Explicit, CommandType::Auto] {
            assert_eq!(CommandType::parse(&t.to_string()), Some(t));
        }
        assert_eq!(CommandType::parse("manual"), None);
    }
}
