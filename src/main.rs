#![deny(unused)]
//! SkillForge sandboxed lab-execution engine.
//!
//! Takes untrusted, learner-submitted input (a shell command, a source
//! snippet, or a SQL query), runs it inside an isolated, resource-bounded
//! sandbox, and decides whether the result satisfies the lab's
//! correctness criteria. This binary wires the engine together and
//! exposes the execution contract over a thin HTTP boundary.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use skillforge_core::config::AppConfig;
use skillforge_core::{Error, ExecutionRequest, LabRegistry};
use skillforge_executors::LabEngine;
use skillforge_sandbox::{DockerSandbox, PostgresSandbox, SandboxEngine, SessionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    configure_tracing();

    tracing::info!("Starting SkillForge v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "No configuration files found, using built-in defaults");
        AppConfig::default()
    });

    // =========================================================================
    // Lab content (read-only input from the authoring collaborator)
    // =========================================================================
    let registry = match LabRegistry::from_dir(&config.labs.content_dir) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::warn!(error = %e, "Lab content directory unavailable, starting with an empty registry");
            LabRegistry::new()
        }
    };

    // =========================================================================
    // Sandbox plane
    // =========================================================================
    let sandbox = Arc::new(DockerSandbox::new()?);
    if !sandbox.is_available().await {
        tracing::warn!("Docker daemon is not responding; executions will fail until it is up");
    }

    let database = Arc::new(PostgresSandbox::new(sandbox.clone(), config.database.clone()));
    let sessions = Arc::new(SessionManager::new(sandbox, database));

    // =========================================================================
    // Execution engine + reaper
    // =========================================================================
    let engine = Arc::new(LabEngine::new(
        Arc::new(registry),
        sessions,
        &config,
    ));
    let _reaper = engine.spawn_reaper(&config);

    // =========================================================================
    // HTTP boundary (consumed by the terminal-rendering frontend)
    // =========================================================================
    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v1/labs/execute", post(execute_lab))
        .route("/api/v1/labs/:lab_id/progress", get(lab_progress))
        .route("/api/v1/labs/:lab_id/end", post(end_attempt))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "SkillForge listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn configure_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,skillforge=debug".into()),
    );

    if std::env::var("SKILLFORGE_JSON_LOGS").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health(State(engine): State<Arc<LabEngine>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sandbox_available": engine.is_available().await,
    }))
}

async fn execute_lab(
    State(engine): State<Arc<LabEngine>>,
    Json(request): Json<ExecutionRequest>,
) -> impl IntoResponse {
    match engine.execute(request).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(Error::LabNotFound(lab_id)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("Lab not found: {}", lab_id) })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Execution request failed at the boundary");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "Internal error" })),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: String,
}

async fn lab_progress(
    State(engine): State<Arc<LabEngine>>,
    Path(lab_id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> impl IntoResponse {
    match engine.progress(&lab_id, &query.session_id) {
        Ok(progress) => (StatusCode::OK, Json(progress)).into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("Lab not found: {}", lab_id) })),
        )
            .into_response(),
    }
}

async fn end_attempt(
    State(engine): State<Arc<LabEngine>>,
    Path(lab_id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> impl IntoResponse {
    engine.end_attempt(&lab_id, &query.session_id).await;
    Json(json!({ "success": true }))
}
