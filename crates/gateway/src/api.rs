//! The `/api` routes.
//!
//! Endpoints:
//!
//! - `POST /api/run`           - Start a run, receive its events as SSE
//! - `GET  /api/models`        - Supported model backends
//! - `GET  /api/tools`         - Tool descriptors per profile
//! - `GET  /api/identity`      - Caller identity and allowed regions
//! - `GET  /api/threads/{id}`  - Snapshot of a thread's history

use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderName, StatusCode, header},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use infrapilot_agent::RunRequest;
use infrapilot_core::error::Error;
use infrapilot_core::message::{MessageHistory, ThreadId};
use infrapilot_core::tool::ToolDescriptor;
use infrapilot_providers::CATALOG;

use crate::SharedState;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/run", post(run_handler))
        .route("/models", get(models_handler))
        .route("/tools", get(tools_handler))
        .route("/identity", get(identity_handler))
        .route("/threads/{id}", get(thread_handler))
        .with_state(state)
}

// ── Response types ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

/// Status code for an error returned before a run starts.
fn error_response(err: Error) -> ApiError {
    let status = match &err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::ThreadBusy { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}

#[derive(Serialize)]
struct ProviderInfo {
    key: &'static str,
    name: &'static str,
    default_model: &'static str,
    models: &'static [&'static str],
    requires_api_key: bool,
}

#[derive(Serialize)]
struct ModelsResponse {
    providers: Vec<ProviderInfo>,
}

#[derive(Serialize)]
struct ProfileInfo {
    name: &'static str,
    tools: Vec<ToolDescriptor>,
}

#[derive(Serialize)]
struct ToolsResponse {
    profiles: Vec<ProfileInfo>,
}

// ── Handlers ─────────────────────────────────────────────────────────────

/// `POST /api/run` - validate, admit and stream one run.
async fn run_handler(
    State(state): State<SharedState>,
    Json(payload): Json<RunRequest>,
) -> Result<Response, ApiError> {
    info!(
        provider = %payload.provider,
        thread_id = payload.thread_id.as_deref().unwrap_or("-"),
        "Run request"
    );

    let handle = state.service.start_run(payload).await.map_err(|e| {
        warn!(error = %e, "Run rejected");
        error_response(e)
    })?;

    let stream = ReceiverStream::new(handle.events).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(SseEvent::default().data(data))
    });

    Ok((
        [(header::CACHE_CONTROL, "no-cache"), (X_ACCEL_BUFFERING, "no")],
        Sse::new(stream),
    )
        .into_response())
}

/// `GET /api/models`
async fn models_handler() -> Json<ModelsResponse> {
    let providers = CATALOG
        .iter()
        .map(|spec| ProviderInfo {
            key: spec.key,
            name: spec.name,
            default_model: spec.default_model,
            models: spec.models,
            requires_api_key: spec.requires_api_key,
        })
        .collect();
    Json(ModelsResponse { providers })
}

/// `GET /api/tools`
async fn tools_handler(State(state): State<SharedState>) -> Json<ToolsResponse> {
    let profiles = state
        .service
        .profiles()
        .iter()
        .map(|(profile, registry)| ProfileInfo {
            name: profile.as_str(),
            tools: registry.describe(),
        })
        .collect();
    Json(ToolsResponse { profiles })
}

/// `GET /api/identity` - the permissions tool's payload, unchanged.
async fn identity_handler(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let result = state.service.identity().await;
    if result.success {
        Ok(Json(result.payload.unwrap_or_default()))
    } else {
        Err(api_error(
            StatusCode::BAD_GATEWAY,
            result.error.unwrap_or_else(|| "identity lookup failed".into()),
        ))
    }
}

/// `GET /api/threads/{id}`
async fn thread_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MessageHistory>, ApiError> {
    let thread_id = ThreadId::from(id.as_str());
    match state.service.threads().snapshot(&thread_id).await {
        Ok(Some(history)) => Ok(Json(history)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("Thread {id} not found"))),
        Err(e) => Err(error_response(e)),
    }
}
