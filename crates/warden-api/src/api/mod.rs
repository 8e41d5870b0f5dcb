//! HTTP API routes
//!
//! Each submodule handles one resource with handlers mapping 1:1 to kernel
//! operations.

pub mod checkpoints;
pub mod commands;
pub mod common;
pub mod events;
pub mod instances;
pub mod workflows;

use axum::Router;

use crate::state::ApiState;

// Re-export common types
pub use common::{ErrorResponse, ListResponse};

/// Assemble every resource router
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .merge(events::routes(state.clone()))
        .merge(commands::routes(state.clone()))
        .merge(instances::routes(state.clone()))
        .merge(checkpoints::routes(state.clone()))
        .merge(workflows::routes(state))
}
