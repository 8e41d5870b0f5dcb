//! Command log HTTP routes

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use warden_core::command::{CommandEntry, CommandStats, CommandType, NewCommandEntry};
use warden_core::error::KernelError;
use warden_storage::CommandFilter;

use super::common::{error_response, pagination, ApiResult};
use crate::state::ApiState;

/// Create command log routes
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/v1/commands", post(log_command).get(search_commands))
        .route("/v1/commands/:id", get(get_command))
        .route("/v1/instances/:instance_id/commands/stats", get(command_stats))
        .with_state(state)
}

/// Request body for logging a command
#[derive(Debug, Deserialize, ToSchema)]
pub struct LogCommandRequest {
    pub instance_id: String,
    /// One of: mcp_tool, explicit, auto.
    #[schema(example = "mcp_tool")]
    pub command_type: String,
    pub action: String,
    pub tool_name: Option<String>,
    /// Redacted before persistence.
    pub parameters: Option<serde_json::Value>,
    /// Redacted before persistence.
    pub result: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub context_data: Option<serde_json::Value>,
    pub source: Option<String>,
}

/// Response carrying the allocated log id
#[derive(Debug, Serialize, ToSchema)]
pub struct LogCommandResponse {
    pub id: i64,
}

/// Query parameters for command search
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct CommandsQuery {
    pub instance_id: Option<String>,
    pub action: Option<String>,
    /// Only return successful commands.
    #[serde(default)]
    pub success_only: bool,
    /// Inclusive lower bound (RFC 3339).
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    /// Exclusive upper bound (RFC 3339).
    pub until: Option<chrono::DateTime<chrono::Utc>>,
    /// Rows to skip.
    pub offset: Option<u32>,
    /// Maximum rows to return (default 100).
    pub limit: Option<u32>,
}

/// Paged command listing
#[derive(Debug, Serialize)]
pub struct CommandsResponse {
    pub data: Vec<CommandEntry>,
    pub total: u64,
}

/// POST /v1/commands - Log a command (redacted before persistence)
#[utoipa::path(
    post,
    path = "/v1/commands",
    request_body = LogCommandRequest,
    responses(
        (status = 201, description = "Command logged", body = LogCommandResponse),
        (status = 400, description = "Unknown command type")
    ),
    tag = "commands"
)]
pub async fn log_command(
    State(state): State<ApiState>,
    Json(request): Json<LogCommandRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<LogCommandResponse>)> {
    let command_type = CommandType::parse(&request.command_type).ok_or_else(|| {
        error_response(KernelError::Validation(format!(
            "unknown command type: {}",
            request.command_type
        )))
    })?;

    let entry = NewCommandEntry {
        instance_id: request.instance_id,
        command_type,
        action: request.action,
        tool_name: request.tool_name,
        parameters: request.parameters,
        result: request.result,
        success: request.success,
        error_message: request.error_message,
        execution_time_ms: request.execution_time_ms,
        tags: request.tags,
        context_data: request.context_data,
        source: request.source,
    };

    let id = state.commands.log(entry).await.map_err(error_response)?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(LogCommandResponse { id }),
    ))
}

/// GET /v1/commands - Search the command log
#[utoipa::path(
    get,
    path = "/v1/commands",
    params(CommandsQuery),
    responses(
        (status = 200, description = "Matching commands, newest first")
    ),
    tag = "commands"
)]
pub async fn search_commands(
    State(state): State<ApiState>,
    Query(query): Query<CommandsQuery>,
) -> ApiResult<Json<CommandsResponse>> {
    let filter = CommandFilter {
        instance_id: query.instance_id.clone(),
        action: query.action.clone(),
        success_only: query.success_only,
        since: query.since,
        until: query.until,
    };

    let page = state
        .commands
        .search(filter, pagination(query.offset, query.limit))
        .await
        .map_err(error_response)?;

    Ok(Json(CommandsResponse {
        data: page.items,
        total: page.total,
    }))
}

/// GET /v1/commands/{id} - Fetch one command entry
#[utoipa::path(
    get,
    path = "/v1/commands/{id}",
    params(("id" = i64, Path, description = "Command log id")),
    responses(
        (status = 200, description = "The command entry"),
        (status = 404, description = "No such entry")
    ),
    tag = "commands"
)]
pub async fn get_command(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<CommandEntry>> {
    let entry = state.commands.get(id).await.map_err(error_response)?;
    Ok(Json(entry))
}

/// GET /v1/instances/{instance_id}/commands/stats - Success/failure counts
#[utoipa::path(
    get,
    path = "/v1/instances/{instance_id}/commands/stats",
    params(("instance_id" = String, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Aggregated counts")
    ),
    tag = "commands"
)]
pub async fn command_stats(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<CommandStats>> {
    let stats = state
        .commands
        .stats(&instance_id)
        .await
        .map_err(error_response)?;
    Ok(Json(stats))
}
