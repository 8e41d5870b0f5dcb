//! Workflow HTTP routes

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use warden_core::error::KernelError;
use warden_core::report::{epic_report, report, EpicTestReport, TestReport};
use warden_core::stage::{Stage, TestType};
use warden_core::workflow::{TestDefinition, Workflow, WorkflowTransition};

use super::common::{error_response, ApiResult, ListResponse};
use crate::state::ApiState;

/// Create workflow routes
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/v1/workflows", post(create_workflow))
        .route("/v1/workflows/:workflow_id", get(get_workflow))
        .route(
            "/v1/workflows/:workflow_id/transition",
            post(transition_workflow),
        )
        .route(
            "/v1/workflows/:workflow_id/escalate",
            post(escalate_workflow),
        )
        .route(
            "/v1/workflows/:workflow_id/transitions",
            get(list_transitions),
        )
        .route("/v1/workflows/:workflow_id/report", get(workflow_report))
        .route("/v1/epics/:epic_id/workflows", get(list_workflows_by_epic))
        .route("/v1/epics/:epic_id/report", get(epic_workflow_report))
        .with_state(state)
}

/// Request body for creating a workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    pub test_id: String,
    pub epic_id: String,
    /// One of: ui, api, unit, integration.
    #[schema(example = "ui")]
    pub test_type: String,
    pub parameters: Option<serde_json::Value>,
}

/// Request body for a stage transition
#[derive(Debug, Deserialize, ToSchema)]
pub struct TransitionRequest {
    /// Target stage.
    #[schema(example = "execution")]
    pub to_stage: String,
    #[serde(default)]
    pub reason: String,
}

/// POST /v1/workflows - Create a workflow in `pending`
#[utoipa::path(
    post,
    path = "/v1/workflows",
    request_body = CreateWorkflowRequest,
    responses(
        (status = 201, description = "Workflow created"),
        (status = 400, description = "Unknown test type"),
        (status = 409, description = "A workflow for this test already exists")
    ),
    tag = "workflows"
)]
pub async fn create_workflow(
    State(state): State<ApiState>,
    Json(request): Json<CreateWorkflowRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<Workflow>)> {
    let test_type = TestType::parse(&request.test_type).ok_or_else(|| {
        error_response(KernelError::Validation(format!(
            "unknown test type: {}",
            request.test_type
        )))
    })?;

    let definition = TestDefinition {
        test_id: request.test_id,
        epic_id: request.epic_id,
        test_type,
        parameters: request.parameters,
    };
    let workflow = state
        .machine
        .create(&definition)
        .await
        .map_err(error_response)?;
    Ok((axum::http::StatusCode::CREATED, Json(workflow)))
}

/// GET /v1/workflows/{workflow_id} - Fetch a workflow
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "The workflow row"),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<ApiState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    let workflow = state
        .machine
        .get(workflow_id)
        .await
        .map_err(error_response)?;
    Ok(Json(workflow))
}

/// POST /v1/workflows/{workflow_id}/transition - Validated stage change
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/transition",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Workflow after the transition"),
        (status = 400, description = "Unknown stage"),
        (status = 409, description = "Transition not allowed from the current stage")
    ),
    tag = "workflows"
)]
pub async fn transition_workflow(
    State(state): State<ApiState>,
    Path(workflow_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> ApiResult<Json<Workflow>> {
    let to_stage = Stage::parse(&request.to_stage).ok_or_else(|| {
        error_response(KernelError::Validation(format!(
            "unknown stage: {}",
            request.to_stage
        )))
    })?;

    let reason = if request.reason.is_empty() {
        format!("admin transition to {to_stage}")
    } else {
        request.reason
    };
    let workflow = state
        .machine
        .transition(workflow_id, to_stage, &reason)
        .await
        .map_err(error_response)?;
    Ok(Json(workflow))
}

/// POST /v1/workflows/{workflow_id}/escalate - Flag for human attention
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/escalate",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow with the escalation flag set"),
        (status = 409, description = "Workflow already completed")
    ),
    tag = "workflows"
)]
pub async fn escalate_workflow(
    State(state): State<ApiState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    let workflow = state
        .machine
        .escalate(workflow_id)
        .await
        .map_err(error_response)?;
    Ok(Json(workflow))
}

/// GET /v1/workflows/{workflow_id}/transitions - Transition audit history
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/transitions",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Transitions, oldest first")
    ),
    tag = "workflows"
)]
pub async fn list_transitions(
    State(state): State<ApiState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<WorkflowTransition>>> {
    let transitions = state
        .machine
        .transitions(workflow_id)
        .await
        .map_err(error_response)?;
    let total = transitions.len() as u64;
    Ok(Json(ListResponse::new(transitions, total)))
}

/// GET /v1/workflows/{workflow_id}/report - Per-test aggregated report
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/report",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Aggregated test report"),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workflows"
)]
pub async fn workflow_report(
    State(state): State<ApiState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<TestReport>> {
    let workflow = state
        .machine
        .get(workflow_id)
        .await
        .map_err(error_response)?;
    Ok(Json(report(&workflow)))
}

/// GET /v1/epics/{epic_id}/workflows - All workflows of an epic
#[utoipa::path(
    get,
    path = "/v1/epics/{epic_id}/workflows",
    params(("epic_id" = String, Path, description = "Epic ID")),
    responses(
        (status = 200, description = "Workflows, oldest first")
    ),
    tag = "workflows"
)]
pub async fn list_workflows_by_epic(
    State(state): State<ApiState>,
    Path(epic_id): Path<String>,
) -> ApiResult<Json<ListResponse<Workflow>>> {
    let workflows = state
        .machine
        .list_by_epic(&epic_id)
        .await
        .map_err(error_response)?;
    let total = workflows.len() as u64;
    Ok(Json(ListResponse::new(workflows, total)))
}

/// GET /v1/epics/{epic_id}/report - Collective epic report
#[utoipa::path(
    get,
    path = "/v1/epics/{epic_id}/report",
    params(("epic_id" = String, Path, description = "Epic ID")),
    responses(
        (status = 200, description = "Aggregated epic report")
    ),
    tag = "workflows"
)]
pub async fn epic_workflow_report(
    State(state): State<ApiState>,
    Path(epic_id): Path<String>,
) -> ApiResult<Json<EpicTestReport>> {
    let workflows = state
        .machine
        .list_by_epic(&epic_id)
        .await
        .map_err(error_response)?;
    Ok(Json(epic_report(&epic_id, &workflows)))
}
