// Warden admin API server
// Boots configuration, storage, migrations, the stale sweeper, and the router.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use warden_api::{api, ApiDoc, ApiState};
use warden_core::config::KernelConfig;
use warden_storage::PostgresKernelStore;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Periodic stale sweep, cancelled with the server
fn spawn_sweeper(state: ApiState, shutdown: tokio_util::sync::CancellationToken) {
    let interval = state.config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match state.registry.mark_stale_sweep().await {
                        Ok(swept) if !swept.is_empty() => {
                            tracing::info!(count = swept.len(), "sweep marked instances stale");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("stale sweep failed: {e}"),
                    }
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "warden_api=info,warden_kernel=info,warden_storage=info,tower_http=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    let store = Arc::new(PostgresKernelStore::new(pool));
    store.migrate().await.context("migrations failed")?;

    let config = KernelConfig::from_env();
    tracing::info!(
        stale_threshold_secs = config.stale_threshold.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        max_retries = config.max_retries,
        "kernel configured"
    );

    let state = ApiState::new(store, config);

    let shutdown = tokio_util::sync::CancellationToken::new();
    spawn_sweeper(state.clone(), shutdown.clone());

    let app = Router::new()
        .route("/health", get(health))
        .route("/openapi.json", get(openapi_json))
        .merge(api::routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = format!("0.0.0.0:{port}");
    tracing::info!(%addr, "warden admin API listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
