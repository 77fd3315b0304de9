//! HTTP routes for the smelt server.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
};
use smelt_core::CompileService;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::ClientId;
use crate::error::{ServerError, ServerResult};
use crate::protocol::{CompilationResponse, HealthResponse, StatsResponse};

/// Application state shared across handlers.
pub struct AppState {
    pub service: CompileService,
    /// Key rate limits on `X-Forwarded-For` instead of the peer address.
    pub trust_forwarded: bool,
}

impl AppState {
    pub fn new(service: CompileService, trust_forwarded: bool) -> Self {
        Self {
            service,
            trust_forwarded,
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/compile", post(compile_handler))
        .route("/download/{id}", get(download_handler))
        .route("/info/{id}", get(info_handler))
        .route("/compilations/{id}", delete(delete_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Compile a batch.
///
/// Admission runs before the body is read, so a limited client costs no
/// more than its headers.
async fn compile_handler(
    State(state): State<Arc<AppState>>,
    client: ClientId,
    body: Body,
) -> ServerResult<Json<CompilationResponse>> {
    let remaining = state.service.admit(client.as_str())?;

    let limit = state.service.config().limits.max_body_bytes;
    let bytes = to_bytes(body, limit)
        .await
        .map_err(|_| ServerError::PayloadTooLarge { limit })?;

    let request = state.service.validate(&bytes)?;
    tracing::info!(
        "Accepted request {} from {} ({} plugins, {} left in window)",
        request.id,
        client,
        request.plugins.len(),
        remaining
    );

    // Detached so a client disconnect cannot cancel a running batch
    let task_state = state.clone();
    let compilation = tokio::spawn(async move { task_state.service.compile(request).await })
        .await
        .map_err(|e| ServerError::Internal(format!("compile task failed: {e}")))?;

    Ok(Json(CompilationResponse::from(&compilation)))
}

/// Download the archive of a compilation.
async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServerResult<Response> {
    let archive = state.service.download(&id).await?;
    let disposition = format!("attachment; filename=\"{}\"", archive.file_name);

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        archive.bytes,
    )
        .into_response())
}

/// Metadata of a compilation.
async fn info_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServerResult<Json<CompilationResponse>> {
    let compilation = state.service.info(&id).await?;
    Ok(Json(CompilationResponse::from(&compilation)))
}

/// Drop a compilation and its files before it expires.
async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServerResult<StatusCode> {
    state.service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse::new(
        state.service.config(),
        state.service.pool().size(),
    ))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let config = state.service.config();
    Json(StatsResponse {
        counters: state.service.stats(),
        active_compilations: state.service.active_compilations().await,
        workers_busy: state.service.pool().in_use(),
        file_retention_seconds: config.retention.as_secs(),
        cleanup_interval_seconds: config.sweep_interval.as_secs(),
    })
}
