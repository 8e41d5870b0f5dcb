//! Checkpoint HTTP routes

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use warden_core::checkpoint::{Checkpoint, CheckpointType, ReconstructedState};
use warden_core::error::KernelError;

use super::common::{error_response, ApiResult};
use crate::state::ApiState;

/// Create checkpoint routes
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route(
            "/v1/instances/:instance_id/checkpoints",
            post(create_checkpoint),
        )
        .route(
            "/v1/instances/:instance_id/checkpoints/latest",
            get(get_latest_checkpoint),
        )
        .route(
            "/v1/instances/:instance_id/reconstruct",
            get(reconstruct_state),
        )
        .route("/v1/checkpoints/:checkpoint_id/load", post(load_checkpoint))
        .with_state(state)
}

/// Request body for creating a checkpoint
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCheckpointRequest {
    /// One of: context_window, epic_completion, manual.
    #[schema(example = "manual")]
    pub checkpoint_type: String,
    pub work_state: serde_json::Value,
    /// Context window usage in [0, 100].
    pub context_window_percent: f64,
    #[serde(default)]
    pub reason: String,
}

/// POST /v1/instances/{instance_id}/checkpoints - Snapshot work-state
#[utoipa::path(
    post,
    path = "/v1/instances/{instance_id}/checkpoints",
    params(("instance_id" = String, Path, description = "Instance ID")),
    request_body = CreateCheckpointRequest,
    responses(
        (status = 201, description = "Checkpoint written"),
        (status = 400, description = "Invalid type or percent"),
        (status = 409, description = "A checkpoint already covers this sequence")
    ),
    tag = "checkpoints"
)]
pub async fn create_checkpoint(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Json(request): Json<CreateCheckpointRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<Checkpoint>)> {
    let checkpoint_type = CheckpointType::parse(&request.checkpoint_type).ok_or_else(|| {
        error_response(KernelError::Validation(format!(
            "unknown checkpoint type: {}",
            request.checkpoint_type
        )))
    })?;

    let checkpoint = state
        .checkpoints
        .create(
            &instance_id,
            checkpoint_type,
            request.work_state,
            request.context_window_percent,
            &request.reason,
        )
        .await
        .map_err(error_response)?;
    Ok((axum::http::StatusCode::CREATED, Json(checkpoint)))
}

/// GET /v1/instances/{instance_id}/checkpoints/latest - Latest checkpoint
#[utoipa::path(
    get,
    path = "/v1/instances/{instance_id}/checkpoints/latest",
    params(("instance_id" = String, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "The latest checkpoint"),
        (status = 404, description = "No checkpoint exists")
    ),
    tag = "checkpoints"
)]
pub async fn get_latest_checkpoint(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<Checkpoint>> {
    let checkpoint = state
        .checkpoints
        .latest(&instance_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| {
            error_response(KernelError::NotFound(format!(
                "no checkpoint for instance {instance_id}"
            )))
        })?;
    Ok(Json(checkpoint))
}

/// POST /v1/checkpoints/{checkpoint_id}/load - Load by id, recording the load
#[utoipa::path(
    post,
    path = "/v1/checkpoints/{checkpoint_id}/load",
    params(("checkpoint_id" = Uuid, Path, description = "Checkpoint ID")),
    responses(
        (status = 200, description = "The checkpoint; a load event was recorded"),
        (status = 404, description = "Checkpoint not found")
    ),
    tag = "checkpoints"
)]
pub async fn load_checkpoint(
    State(state): State<ApiState>,
    Path(checkpoint_id): Path<Uuid>,
) -> ApiResult<Json<Checkpoint>> {
    let checkpoint = state
        .checkpoints
        .load(checkpoint_id)
        .await
        .map_err(error_response)?;
    Ok(Json(checkpoint))
}

/// GET /v1/instances/{instance_id}/reconstruct - Best-source work-state
#[utoipa::path(
    get,
    path = "/v1/instances/{instance_id}/reconstruct",
    params(("instance_id" = String, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Reconstructed work-state with source and confidence"),
        (status = 404, description = "Instance not found")
    ),
    tag = "checkpoints"
)]
pub async fn reconstruct_state(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<ReconstructedState>> {
    let reconstructed = state
        .checkpoints
        .reconstruct(&instance_id)
        .await
        .map_err(error_response)?;
    Ok(Json(reconstructed))
}
