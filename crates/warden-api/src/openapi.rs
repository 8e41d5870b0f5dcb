//! OpenAPI documentation assembly

use utoipa::OpenApi;

use crate::api;

/// OpenAPI documentation for the admin surface
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Warden Admin API",
        description = "Administrative tool endpoints for the Warden workflow & session kernel"
    ),
    paths(
        api::events::emit_event,
        api::events::query_events,
        api::events::replay_events,
        api::events::list_event_types,
        api::commands::log_command,
        api::commands::search_commands,
        api::commands::get_command,
        api::commands::command_stats,
        api::instances::register_instance,
        api::instances::heartbeat,
        api::instances::close_instance,
        api::instances::resume_instance,
        api::instances::get_instance_details,
        api::instances::list_stale_instances,
        api::instances::list_active_instances,
        api::checkpoints::create_checkpoint,
        api::checkpoints::get_latest_checkpoint,
        api::checkpoints::load_checkpoint,
        api::checkpoints::reconstruct_state,
        api::workflows::create_workflow,
        api::workflows::get_workflow,
        api::workflows::transition_workflow,
        api::workflows::escalate_workflow,
        api::workflows::list_transitions,
        api::workflows::workflow_report,
        api::workflows::list_workflows_by_epic,
        api::workflows::epic_workflow_report,
    ),
    components(schemas(
        api::common::ErrorResponse,
        api::events::EmitEventRequest,
        api::commands::LogCommandRequest,
        api::commands::LogCommandResponse,
        api::instances::RegisterInstanceRequest,
        api::instances::HeartbeatRequest,
        api::instances::CloseInstanceRequest,
        api::instances::ResumeRequest,
        api::checkpoints::CreateCheckpointRequest,
        api::workflows::CreateWorkflowRequest,
        api::workflows::TransitionRequest,
    )),
    tags(
        (name = "events", description = "Append-only event store"),
        (name = "commands", description = "Redacted command log"),
        (name = "instances", description = "Supervisor instance registry"),
        (name = "checkpoints", description = "Work-state checkpoints"),
        (name = "workflows", description = "Test workflow state machine"),
    )
)]
pub struct ApiDoc;
