//! Instance registry HTTP routes

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use warden_core::checkpoint::ReconstructedState;
use warden_core::error::KernelError;
use warden_core::instance::{Instance, InstanceType};
use warden_kernel::{Resolution, ResolutionStrategy};

use super::common::{error_response, pagination, ApiResult};
use crate::state::ApiState;

/// Create instance routes
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/v1/instances", post(register_instance))
        .route("/v1/instances/resume", post(resume_instance))
        .route("/v1/instances/stale", get(list_stale_instances))
        .route("/v1/instances/active", get(list_active_instances))
        .route("/v1/instances/:instance_id", get(get_instance_details))
        .route("/v1/instances/:instance_id/heartbeat", post(heartbeat))
        .route("/v1/instances/:instance_id/close", post(close_instance))
        .with_state(state)
}

/// Request body for registering an instance
#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterInstanceRequest {
    pub project: String,
    /// PS (primary supervisor) or MS (monitoring supervisor).
    #[schema(example = "PS")]
    pub instance_type: String,
    pub metadata: Option<serde_json::Value>,
}

/// Request body for a heartbeat
#[derive(Debug, Deserialize, ToSchema)]
pub struct HeartbeatRequest {
    /// Context window usage in [0, 100].
    pub context_window_percent: Option<f64>,
    pub current_epic: Option<String>,
}

/// Request body for closing an instance
#[derive(Debug, Deserialize, ToSchema)]
pub struct CloseInstanceRequest {
    pub reason: String,
}

/// Request body for resume resolution
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResumeRequest {
    /// Empty, exact id, id prefix, project name, or epic id.
    #[serde(default)]
    pub hint: String,
}

/// Resume response: either a resolved instance or candidates to pick from
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResumeResponse {
    Resolved {
        instance: Instance,
        strategy: ResolutionStrategy,
        reconstructed: ReconstructedState,
    },
    Ambiguous {
        matches: Vec<Instance>,
        hint: String,
    },
}

/// Query for paginated instance listings
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct InstancesQuery {
    /// Rows to skip.
    pub offset: Option<u32>,
    /// Maximum rows to return (default 100).
    pub limit: Option<u32>,
}

/// Paged instance listing
#[derive(Debug, Serialize)]
pub struct InstancesResponse {
    pub data: Vec<Instance>,
    pub total: u64,
}

/// POST /v1/instances - Register a new supervisor instance
#[utoipa::path(
    post,
    path = "/v1/instances",
    request_body = RegisterInstanceRequest,
    responses(
        (status = 201, description = "Instance registered"),
        (status = 400, description = "Invalid project or instance type")
    ),
    tag = "instances"
)]
pub async fn register_instance(
    State(state): State<ApiState>,
    Json(request): Json<RegisterInstanceRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<Instance>)> {
    let instance_type = InstanceType::parse(&request.instance_type).ok_or_else(|| {
        error_response(KernelError::Validation(format!(
            "unknown instance type: {}",
            request.instance_type
        )))
    })?;

    let instance = state
        .registry
        .register(&request.project, instance_type, request.metadata)
        .await
        .map_err(error_response)?;
    Ok((axum::http::StatusCode::CREATED, Json(instance)))
}

/// POST /v1/instances/{instance_id}/heartbeat - Record liveness
#[utoipa::path(
    post,
    path = "/v1/instances/{instance_id}/heartbeat",
    params(("instance_id" = String, Path, description = "Instance ID")),
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "Updated instance row"),
        (status = 400, description = "context_window_percent out of range"),
        (status = 404, description = "Instance not found")
    ),
    tag = "instances"
)]
pub async fn heartbeat(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<Json<Instance>> {
    let instance = state
        .registry
        .heartbeat(
            &instance_id,
            request.context_window_percent,
            request.current_epic,
        )
        .await
        .map_err(error_response)?;
    Ok(Json(instance))
}

/// POST /v1/instances/{instance_id}/close - Close an instance (terminal)
#[utoipa::path(
    post,
    path = "/v1/instances/{instance_id}/close",
    params(("instance_id" = String, Path, description = "Instance ID")),
    request_body = CloseInstanceRequest,
    responses(
        (status = 200, description = "Closed instance row"),
        (status = 404, description = "Instance not found")
    ),
    tag = "instances"
)]
pub async fn close_instance(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Json(request): Json<CloseInstanceRequest>,
) -> ApiResult<Json<Instance>> {
    let instance = state
        .registry
        .close(&instance_id, &request.reason)
        .await
        .map_err(error_response)?;
    Ok(Json(instance))
}

/// POST /v1/instances/resume - Resolve a hint and reconstruct work-state
#[utoipa::path(
    post,
    path = "/v1/instances/resume",
    request_body = ResumeRequest,
    responses(
        (status = 200, description = "Resolved instance with reconstructed state, or candidates"),
        (status = 404, description = "Nothing matches the hint")
    ),
    tag = "instances"
)]
pub async fn resume_instance(
    State(state): State<ApiState>,
    Json(request): Json<ResumeRequest>,
) -> ApiResult<Json<ResumeResponse>> {
    let resolution = state
        .registry
        .resolve(&request.hint)
        .await
        .map_err(error_response)?;

    let response = match resolution {
        Resolution::Resolved { instance, strategy } => {
            let reconstructed = state
                .checkpoints
                .reconstruct(&instance.instance_id)
                .await
                .map_err(error_response)?;
            ResumeResponse::Resolved {
                instance,
                strategy,
                reconstructed,
            }
        }
        Resolution::Ambiguous { matches, hint } => ResumeResponse::Ambiguous { matches, hint },
    };
    Ok(Json(response))
}

/// GET /v1/instances/{instance_id} - Instance details
#[utoipa::path(
    get,
    path = "/v1/instances/{instance_id}",
    params(("instance_id" = String, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "The instance row"),
        (status = 404, description = "Instance not found")
    ),
    tag = "instances"
)]
pub async fn get_instance_details(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<Instance>> {
    let instance = state
        .registry
        .get(&instance_id)
        .await
        .map_err(error_response)?;
    Ok(Json(instance))
}

/// GET /v1/instances/stale - Stale instances, most recent heartbeat first
#[utoipa::path(
    get,
    path = "/v1/instances/stale",
    params(InstancesQuery),
    responses(
        (status = 200, description = "Stale instances")
    ),
    tag = "instances"
)]
pub async fn list_stale_instances(
    State(state): State<ApiState>,
    Query(query): Query<InstancesQuery>,
) -> ApiResult<Json<InstancesResponse>> {
    let page = state
        .registry
        .list_stale(pagination(query.offset, query.limit))
        .await
        .map_err(error_response)?;
    Ok(Json(InstancesResponse {
        data: page.items,
        total: page.total,
    }))
}

/// GET /v1/instances/active - Active instances, most recent heartbeat first
#[utoipa::path(
    get,
    path = "/v1/instances/active",
    params(InstancesQuery),
    responses(
        (status = 200, description = "Active instances")
    ),
    tag = "instances"
)]
pub async fn list_active_instances(
    State(state): State<ApiState>,
    Query(query): Query<InstancesQuery>,
) -> ApiResult<Json<InstancesResponse>> {
    let page = state
        .registry
        .list_active(pagination(query.offset, query.limit))
        .await
        .map_err(error_response)?;
    Ok(Json(InstancesResponse {
        data: page.items,
        total: page.total,
    }))
}
