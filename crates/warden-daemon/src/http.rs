//! HTTP control plane: the human approval queue and state switches.
//!
//! The UI polls `/api/approvals`, decides via `/api/approve/{id}`, answers
//! clarifications via `/api/reply/{id}`, and flips modes via `/api/modes`
//! and `/api/state`. Effectors that poll instead of streaming use
//! `/api/actions/approved` and report terminal status on
//! `/api/actions/{id}/complete|fail`. Binds localhost only.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use warden_core::{AutomationMode, SystemMode};

use crate::coordinator::SubmitOutcome;
use crate::error::DaemonError;
use crate::service::KernelService;
use crate::storage::Command;

/// Builds the control-plane router.
pub fn router(service: Arc<KernelService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/propose", post(propose))
        .route("/api/approvals", get(approvals))
        .route("/api/approve/:id", post(approve))
        .route("/api/reply/:id", post(reply))
        .route("/api/modes", get(get_mode).post(set_mode))
        .route("/api/state", get(get_state).post(set_state))
        .route("/api/actions/approved", get(approved_actions))
        .route("/api/actions/:id", get(action_by_id))
        .route("/api/actions/:id/:verb", post(action_status))
        .route("/api/audit", get(audit))
        .route("/api/artifacts", get(artifacts))
        .route("/api/search/vector", post(vector_search))
        .route("/api/commands", post(create_command).patch(update_command))
        .route("/api/commands/pending", get(pending_commands))
        .with_state(service)
}

/// Serves the router until shutdown fires.
pub async fn serve(
    service: Arc<KernelService>,
    listener: tokio::net::TcpListener,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "http control plane listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

fn error_response(error: &DaemonError) -> Response {
    let status = match error {
        DaemonError::ProposalNotFound { .. } => StatusCode::NOT_FOUND,
        DaemonError::InvalidTransition { .. } => StatusCode::CONFLICT,
        DaemonError::AuthFailed | DaemonError::NotPermitted { .. } => StatusCode::FORBIDDEN,
        DaemonError::Serialization(_) => StatusCode::BAD_REQUEST,
        DaemonError::Storage(_) | DaemonError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(%error, "control plane request failed");
    (status, Json(serde_json::json!({ "error": error.masked_reason() }))).into_response()
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "warden online" }))
}

#[derive(Deserialize)]
struct ProposeBody {
    intent: String,
    #[serde(default)]
    risk_score: i64,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    interaction_type: String,
    #[serde(default)]
    agent_message: String,
}

async fn propose(
    State(service): State<Arc<KernelService>>,
    Json(body): Json<ProposeBody>,
) -> Response {
    if body.intent.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "intent is required" })),
        )
            .into_response();
    }
    if !(0..=100).contains(&body.risk_score) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "risk score must be between 0 and 100" })),
        )
            .into_response();
    }

    if body.interaction_type == "CLARIFICATION" {
        return match service.request_clarification(&body.intent, &body.agent_message, &body.domain)
        {
            Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
            Err(error) => error_response(&error),
        };
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // range-checked above
    let risk_score = body.risk_score as u8;
    match service.propose(&body.intent, risk_score, body.payload, &body.domain) {
        Ok((record, outcome)) => {
            let status = if outcome == SubmitOutcome::Rejected {
                StatusCode::FORBIDDEN
            } else {
                StatusCode::CREATED
            };
            (status, Json(record)).into_response()
        }
        Err(error) => error_response(&error),
    }
}

async fn approvals(State(service): State<Arc<KernelService>>) -> Response {
    match service.coordinator().list_pending() {
        Ok(records) => Json(records).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct ApproveBody {
    approved: bool,
}

async fn approve(
    State(service): State<Arc<KernelService>>,
    Path(id): Path<String>,
    Json(body): Json<ApproveBody>,
) -> Response {
    match service.coordinator().decide(&id, body.approved) {
        Ok(record) => Json(record).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct ReplyBody {
    message: String,
}

async fn reply(
    State(service): State<Arc<KernelService>>,
    Path(id): Path<String>,
    Json(body): Json<ReplyBody>,
) -> Response {
    if body.message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "message is required" })),
        )
            .into_response();
    }
    match service.coordinator().reply(&id, &body.message) {
        Ok(record) => Json(record).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct ModeQuery {
    #[serde(default)]
    domain: String,
}

async fn get_mode(
    State(service): State<Arc<KernelService>>,
    Query(query): Query<ModeQuery>,
) -> Response {
    let domain = if query.domain.is_empty() {
        "*".to_string()
    } else {
        query.domain
    };
    match service.user_mode(&domain) {
        Ok(mode) => Json(serde_json::json!({ "domain": domain, "mode": mode.as_str() }))
            .into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct ModeBody {
    #[serde(default)]
    domain: String,
    mode: String,
}

async fn set_mode(
    State(service): State<Arc<KernelService>>,
    Json(body): Json<ModeBody>,
) -> Response {
    let Some(mode) = AutomationMode::parse(&body.mode) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "mode must be AUTO or MANUAL" })),
        )
            .into_response();
    };
    let domain = if body.domain.is_empty() { "*" } else { &body.domain };
    match service.set_user_mode(domain, mode) {
        Ok(()) => Json(serde_json::json!({ "status": "success" })).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn get_state(State(service): State<Arc<KernelService>>) -> Response {
    let (mode, focus) = service.system_state();
    Json(serde_json::json!({ "state": mode.as_str(), "active_focus": focus })).into_response()
}

#[derive(Deserialize)]
struct StateBody {
    state: String,
}

async fn set_state(
    State(service): State<Arc<KernelService>>,
    Json(body): Json<StateBody>,
) -> Response {
    let Some(mode) = SystemMode::parse(&body.state) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "state must be ACTIVE, SHADOW, or PAUSED" })),
        )
            .into_response();
    };
    match service.set_system_mode(mode) {
        Ok(()) => Json(serde_json::json!({ "status": "success", "state": mode.as_str() }))
            .into_response(),
        Err(error) => error_response(&error),
    }
}

async fn approved_actions(State(service): State<Arc<KernelService>>) -> Response {
    match service.approved_proposals() {
        Ok(records) => Json(records).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn action_by_id(
    State(service): State<Arc<KernelService>>,
    Path(id): Path<String>,
) -> Response {
    match service.coordinator().get(&id) {
        Ok(record) => Json(record).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn action_status(
    State(service): State<Arc<KernelService>>,
    Path((id, verb)): Path<(String, String)>,
) -> Response {
    let result = match verb.as_str() {
        "complete" => service.report_completed(&id),
        "fail" => service.report_failed(&id),
        "executing" => service.coordinator().mark_executing(&id),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "verb must be 'complete', 'fail', or 'executing'"
                })),
            )
                .into_response();
        }
    };
    match result {
        Ok(()) => Json(serde_json::json!({ "status": "success" })).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct AuditQuery {
    #[serde(default)]
    limit: usize,
}

async fn audit(
    State(service): State<Arc<KernelService>>,
    Query(query): Query<AuditQuery>,
) -> Response {
    Json(service.audit_recent(query.limit)).into_response()
}

async fn artifacts(State(service): State<Arc<KernelService>>) -> Response {
    match service.artifacts().recent(50) {
        Ok(artifacts) => Json(artifacts).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct VectorSearchBody {
    vector: Vec<f32>,
    #[serde(default)]
    limit: usize,
}

async fn vector_search(
    State(service): State<Arc<KernelService>>,
    Json(body): Json<VectorSearchBody>,
) -> Response {
    if body.vector.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "vector is required" })),
        )
            .into_response();
    }
    match service.memory_search(&body.vector, body.limit) {
        Ok(artifacts) => Json(artifacts).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct CommandBody {
    action: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    payload: String,
}

async fn create_command(
    State(service): State<Arc<KernelService>>,
    Json(body): Json<CommandBody>,
) -> Response {
    if !matches!(body.action.as_str(), "TYPE" | "CLICK" | "FOCUS_WINDOW" | "OPEN_APP") {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "invalid action type" })),
        )
            .into_response();
    }
    let command = Command::new(body.action, body.target, body.payload);
    match service.commands().save(&command) {
        Ok(()) => (StatusCode::CREATED, Json(command)).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct CommandStatusBody {
    id: String,
    status: String,
}

async fn update_command(
    State(service): State<Arc<KernelService>>,
    Json(body): Json<CommandStatusBody>,
) -> Response {
    if !matches!(body.status.as_str(), "executing" | "completed" | "failed") {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "invalid status" })),
        )
            .into_response();
    }
    match service.commands().update_status(&body.id, &body.status) {
        Ok(()) => Json(serde_json::json!({ "status": "success" })).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn pending_commands(State(service): State<Arc<KernelService>>) -> Response {
    match service.commands().pending() {
        Ok(commands) => Json(commands).into_response(),
        Err(error) => error_response(&error),
    }
}
