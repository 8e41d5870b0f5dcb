//! Kernel error kinds
//!
//! A single error enum shared by every kernel service. The variants map to
//! the propagation policy: validation, not-found, conflict, and invalid
//! transition surface to the caller and are never retried; timeout and
//! unavailable are retryable; cancelled short-circuits; escalated is
//! terminal and carries a handoff reference.

use std::fmt;

/// Errors surfaced by kernel operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelError {
    /// Malformed input, unknown enum value, or schema mismatch
    #[error("validation error: {0}")]
    Validation(String),

    /// Entity not present
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-key or version-check violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// Disallowed workflow stage change
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Per-stage or overall timeout
    #[error("timeout: {0}")]
    Timeout(String),

    /// External cancellation
    #[error("cancelled")]
    Cancelled,

    /// Transient collaborator or persistence failure
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Business-level terminal failure requiring human attention
    #[error("escalated: {0}")]
    Escalated(String),
}

impl KernelError {
    /// Whether the error handler may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }

    /// Whether the error is a terminal business failure
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Escalated(_) | Self::Cancelled)
    }

    /// Short machine-readable kind, used in command log entries
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Escalated(_) => ErrorKind::Escalated,
        }
    }
}

/// Discriminant-only view of [`KernelError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InvalidTransition,
    Timeout,
    Cancelled,
    Unavailable,
    Escalated,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation_error",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidTransition => "invalid_transition",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Unavailable => "unavailable",
            Self::Escalated => "escalated",
        };
        f.write_str(s)
    }
}
