//! Event store HTTP routes

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use warden_core::event::{EventRecord, EventType, EventTypeDefinition};
use warden_kernel::{AppendedEvent, ReplayState};
use warden_storage::EventFilter;

use super::common::{error_response, pagination, ApiResult, ListResponse};
use crate::state::ApiState;

/// Create event routes
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/v1/events", post(emit_event))
        .route("/v1/event-types", get(list_event_types))
        .route("/v1/instances/:instance_id/events", get(query_events))
        .route(
            "/v1/instances/:instance_id/events/replay",
            get(replay_events),
        )
        .with_state(state)
}

/// Request body for emitting an event
#[derive(Debug, Deserialize, ToSchema)]
pub struct EmitEventRequest {
    /// Owning instance id.
    pub instance_id: String,
    /// One of the registered event types.
    #[schema(example = "test_started")]
    pub event_type: String,
    /// Payload validated against the event type's schema.
    pub event_data: serde_json::Value,
    /// Optional opaque metadata.
    pub metadata: Option<serde_json::Value>,
}

/// Query parameters for event listing
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct EventsQuery {
    /// Comma-separated event types to match.
    pub event_type: Option<String>,
    /// Inclusive lower bound (RFC 3339).
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    /// Exclusive upper bound (RFC 3339).
    pub until: Option<chrono::DateTime<chrono::Utc>>,
    /// Substring match over the serialized payload.
    pub keyword: Option<String>,
    /// Rows to skip.
    pub offset: Option<u32>,
    /// Maximum rows to return (default 100).
    pub limit: Option<u32>,
}

/// Paged event listing
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub data: Vec<EventRecord>,
    pub total: u64,
    pub has_more: bool,
}

/// Query parameters for replay
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct ReplayQuery {
    /// Fold only events up to this sequence number.
    pub up_to_sequence: Option<i64>,
}

/// POST /v1/events - Append an event to an instance's log
#[utoipa::path(
    post,
    path = "/v1/events",
    request_body = EmitEventRequest,
    responses(
        (status = 201, description = "Event appended"),
        (status = 400, description = "Unknown event type or invalid payload"),
        (status = 404, description = "Instance not found")
    ),
    tag = "events"
)]
pub async fn emit_event(
    State(state): State<ApiState>,
    Json(request): Json<EmitEventRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<AppendedEvent>)> {
    let event_type = EventType::parse(&request.event_type).map_err(error_response)?;
    let appended = state
        .events
        .append(
            &request.instance_id,
            event_type,
            request.event_data,
            request.metadata,
        )
        .await
        .map_err(error_response)?;
    Ok((axum::http::StatusCode::CREATED, Json(appended)))
}

/// GET /v1/instances/{instance_id}/events - Query events newest-first
#[utoipa::path(
    get,
    path = "/v1/instances/{instance_id}/events",
    params(
        ("instance_id" = String, Path, description = "Instance ID"),
        EventsQuery
    ),
    responses(
        (status = 200, description = "Matching events"),
        (status = 400, description = "Unknown event type in filter")
    ),
    tag = "events"
)]
pub async fn query_events(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<EventsResponse>> {
    let mut event_types = Vec::new();
    if let Some(raw) = &query.event_type {
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            event_types.push(EventType::parse(name).map_err(error_response)?);
        }
    }

    let filter = EventFilter {
        event_types,
        since: query.since,
        until: query.until,
        keyword: query.keyword.clone(),
    };

    let page = state
        .events
        .query(&instance_id, filter, pagination(query.offset, query.limit))
        .await
        .map_err(error_response)?;

    Ok(Json(EventsResponse {
        data: page.events,
        total: page.total,
        has_more: page.has_more,
    }))
}

/// GET /v1/instances/{instance_id}/events/replay - Deterministic fold
#[utoipa::path(
    get,
    path = "/v1/instances/{instance_id}/events/replay",
    params(
        ("instance_id" = String, Path, description = "Instance ID"),
        ReplayQuery
    ),
    responses(
        (status = 200, description = "Accumulated replay state")
    ),
    tag = "events"
)]
pub async fn replay_events(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Query(query): Query<ReplayQuery>,
) -> ApiResult<Json<ReplayState>> {
    let replayed = state
        .events
        .replay(&instance_id, query.up_to_sequence)
        .await
        .map_err(error_response)?;
    Ok(Json(replayed))
}

/// GET /v1/event-types - The closed event-type registry
#[utoipa::path(
    get,
    path = "/v1/event-types",
    responses(
        (status = 200, description = "Registered event types")
    ),
    tag = "events"
)]
pub async fn list_event_types(
    State(state): State<ApiState>,
) -> Json<ListResponse<EventTypeDefinition>> {
    let definitions = state.events.list_event_types();
    let total = definitions.len() as u64;
    Json(ListResponse::new(definitions, total))
}
