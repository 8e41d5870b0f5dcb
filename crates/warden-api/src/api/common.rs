//! Common DTOs and error mapping for the admin API

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use warden_core::error::KernelError;

/// Standard error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,
    /// Machine-readable error kind.
    pub kind: String,
}

/// Response wrapper for list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListResponse<T> {
    /// Array of items returned by the list operation.
    pub data: Vec<T>,
    /// Total matching rows before pagination.
    pub total: u64,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>, total: u64) -> Self {
        Self { data, total }
    }
}

/// Clamp raw offset/limit query values into store pagination
pub fn pagination(offset: Option<u32>, limit: Option<u32>) -> warden_storage::Pagination {
    warden_storage::Pagination {
        offset: offset.unwrap_or(0),
        limit: limit.unwrap_or(100).min(1000),
    }
}

/// Map a kernel error to an HTTP response
pub fn error_response(error: KernelError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &error {
        KernelError::Validation(_) => StatusCode::BAD_REQUEST,
        KernelError::NotFound(_) => StatusCode::NOT_FOUND,
        KernelError::Conflict(_) | KernelError::InvalidTransition { .. } => StatusCode::CONFLICT,
        KernelError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        KernelError::Cancelled => StatusCode::CONFLICT,
        KernelError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        KernelError::Escalated(_) => StatusCode::CONFLICT,
    };
    let body = ErrorResponse {
        error: error.to_string(),
        kind: error.kind().to_string(),
    };
    (status, Json(body))
}

/// Shorthand for handler results
pub type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;
