//! REST API server — expose ClassPulse as an HTTP service.
//!
//! Endpoints:
//! - POST /v1/chat — Send a message and get a grounded reply
//! - POST /v1/session/reset — Drop a session's state
//! - GET  /v1/meta — Known students and classes
//! - GET  /v1/student/{name} — Analytics for one student
//! - GET  /v1/class/{id} — Trends for one class
//! - GET  /v1/health — Health check

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use classpulse_core::config::ServerSettings;
use classpulse_core::resolver::{self, MatchResult, RosterKind};

use crate::analytics::{self, ClassTrends, StudentStats};
use crate::middleware::ApiGuard;
use crate::orchestrator::{Orchestrator, TurnOutcome};
use crate::support::UserIdentity;

/// Shared API state.
pub struct ApiState {
    pub orchestrator: Orchestrator,
}

type SharedState = Arc<ApiState>;

// ─── Request/Response types ────────────────────────────────

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Omitted on the first turn; the server mints one.
    pub session: Option<String>,
    #[serde(default)]
    pub user: UserIdentity,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub session: String,
    #[serde(flatten)]
    pub outcome: TurnOutcome,
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub session: String,
}

#[derive(Serialize)]
pub struct MetaResponse {
    pub students: Vec<String>,
    pub classes: Vec<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

fn not_found(what: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("{} has no recorded activity", what),
        }),
    )
}

// ─── Handlers ──────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn chat(
    State(state): State<SharedState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let session = req
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let outcome = state
        .orchestrator
        .handle_turn(&session, &req.user, &req.message)
        .await
        .map_err(internal_error)?;

    Ok(Json(ChatResponse { session, outcome }))
}

async fn reset(
    State(state): State<SharedState>,
    Json(req): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .orchestrator
        .reset_session(&req.session)
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!({ "reset": req.session })))
}

async fn meta(State(state): State<SharedState>) -> Result<Json<MetaResponse>, ApiError> {
    let dataset = state.orchestrator.dataset();
    let students = dataset.list_students().await.map_err(internal_error)?;
    let classes = dataset.list_classes().await.map_err(internal_error)?;
    Ok(Json(MetaResponse { students, classes }))
}

async fn student(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<StudentStats>, ApiError> {
    let dataset = state.orchestrator.dataset();
    let records = dataset.records_for(&name).await.map_err(internal_error)?;
    if let Some(stats) = analytics::student_stats(&name, &records) {
        return Ok(Json(stats));
    }
    // Unknown name: include fuzzy suggestions in the 404 so clients can
    // offer a correction.
    let roster = dataset.list_students().await.map_err(internal_error)?;
    let error = match resolver::resolve(&name, &roster, RosterKind::Student) {
        MatchResult::Suggestions(names) | MatchResult::Ambiguous(names) => {
            format!("no student named \"{}\"; did you mean: {}?", name, names.join(", "))
        }
        _ => format!("no student named \"{}\"", name),
    };
    Err((StatusCode::NOT_FOUND, Json(ErrorResponse { error })))
}

async fn class(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ClassTrends>, ApiError> {
    let records = state
        .orchestrator
        .dataset()
        .records_for_class(&id)
        .await
        .map_err(internal_error)?;
    analytics::class_trends(&id, &records)
        .map(Json)
        .ok_or_else(|| not_found(&format!("class {}", id)))
}

// ─── Server builder ────────────────────────────────────────

/// Build the API router.
pub fn build_router(state: SharedState, guard: Arc<ApiGuard>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/chat", post(chat))
        .route("/v1/session/reset", post(reset))
        .route("/v1/meta", get(meta))
        .route("/v1/student/{name}", get(student))
        .route("/v1/class/{id}", get(class))
        .layer(axum::middleware::from_fn(
            crate::middleware::logging_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            guard,
            crate::middleware::guard_middleware,
        ))
        .with_state(state)
}

/// Start the API server with the configured bind address and guard policy.
pub async fn start_server(state: ApiState, settings: &ServerSettings) -> anyhow::Result<()> {
    let shared = Arc::new(state);
    let guard = Arc::new(ApiGuard::new(settings));
    let app = build_router(shared, guard);

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    info!("API server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
