//! Gateway method handlers.
//!
//! `dispatch` enforces the auth and capability gates, then routes to the
//! per-method handlers. Policy denials come back as ordinary results with
//! `approved=false`; JSON-RPC errors are reserved for protocol and internal
//! failures.

use std::sync::Arc;

use chrono::Utc;
use warden_core::{Action, Proposal, RiskLevel};

use super::frames::{
    ClientInfo, ClientType, ConnectParams, ConnectResult, ErrorShape, ExecRequestParams,
    ExecResolveParams, ExecResult, FocusUpdateParams, MemorySearchParams, MemoryStoreParams,
    RequestFrame, ResponseFrame, SessionUpdateParams, TalkModeParams, WakeParams, ERR_AUTH_FAILED,
    ERR_INTERNAL, ERR_INVALID_PARAMS, ERR_INVALID_REQUEST, ERR_MEMORY, ERR_METHOD_NOT_FOUND,
    ERR_PERMISSION_DENIED, GATEWAY_VERSION,
};
use super::{ClientRegistry, ClientSession, Outcome, RegisteredClient};
use crate::error::DaemonError;
use crate::service::KernelService;
use crate::token::AuthToken;

/// Every method the gateway serves, including `connect`.
const METHODS: &[&str] = &[
    "connect",
    "wake",
    "talk_mode",
    "exec.request",
    "exec.resolve",
    "memory.store",
    "memory.search",
    "focus.update",
    "session.snapshot",
    "session.update",
    "registry.snapshot",
];

/// Routes one parsed frame.
pub(crate) fn dispatch(
    service: &Arc<KernelService>,
    token: &AuthToken,
    registry: &ClientRegistry,
    session: &mut ClientSession,
    frame: RequestFrame,
) -> Outcome {
    let id = frame.id.clone();

    // `connect` is the only method allowed before authentication.
    if frame.method == "connect" {
        return handle_connect(token, registry, session, frame);
    }
    if !session.authenticated {
        return Outcome::Reply(ResponseFrame::fail(
            id,
            ErrorShape::new(ERR_AUTH_FAILED, "authentication required"),
        ));
    }
    if !METHODS.contains(&frame.method.as_str()) {
        return Outcome::Reply(ResponseFrame::fail(
            id,
            ErrorShape::new(
                ERR_METHOD_NOT_FOUND,
                format!("method not found: {}", frame.method),
            ),
        ));
    }
    if !session
        .client_type
        .capabilities()
        .contains(&frame.method.as_str())
    {
        return Outcome::Reply(ResponseFrame::fail(
            id,
            ErrorShape::new(
                ERR_PERMISSION_DENIED,
                format!(
                    "method '{}' not permitted for client type '{}'",
                    frame.method,
                    session.client_type.as_str()
                ),
            ),
        ));
    }

    let result = match frame.method.as_str() {
        "wake" => handle_wake(frame.params),
        "talk_mode" => handle_talk_mode(frame.params),
        "exec.request" => handle_exec_request(service, frame.params),
        "exec.resolve" => handle_exec_resolve(service, frame.params),
        "memory.store" => handle_memory_store(service, frame.params),
        "memory.search" => handle_memory_search(service, frame.params),
        "focus.update" => handle_focus_update(service, frame.params),
        "session.snapshot" => handle_session_snapshot(frame.params),
        "session.update" => handle_session_update(service, frame.params),
        "registry.snapshot" => handle_registry_snapshot(registry),
        _ => unreachable!("method list checked above"),
    };

    Outcome::Reply(match result {
        Ok(value) => ResponseFrame::ok(id, value),
        Err(error) => ResponseFrame::fail(id, error),
    })
}

fn handle_connect(
    token: &AuthToken,
    registry: &ClientRegistry,
    session: &mut ClientSession,
    frame: RequestFrame,
) -> Outcome {
    let id = frame.id;
    let Ok(params) = serde_json::from_value::<ConnectParams>(frame.params) else {
        return Outcome::Reply(ResponseFrame::fail(
            id,
            ErrorShape::new(ERR_INVALID_PARAMS, "invalid connect params"),
        ));
    };

    if !token.verify(&params.token) {
        tracing::warn!(session_id = %session.session_id, "authentication failed");
        return Outcome::ReplyAndClose(ResponseFrame::fail(
            id,
            ErrorShape::new(ERR_AUTH_FAILED, "invalid authentication token"),
        ));
    }

    session.authenticated = true;
    session.client_type = ClientType::parse(&params.client_type);
    if let Ok(mut registry) = registry.write() {
        registry.insert(
            session.session_id.clone(),
            RegisteredClient {
                client_type: session.client_type,
                connected_at: Utc::now(),
            },
        );
    }
    tracing::info!(
        session_id = %session.session_id,
        client_type = session.client_type.as_str(),
        "client authenticated"
    );

    let result = ConnectResult {
        session_id: session.session_id.clone(),
        server_version: GATEWAY_VERSION,
        expires_at: Utc::now() + chrono::Duration::hours(24),
        capabilities: session
            .client_type
            .capabilities()
            .iter()
            .map(|m| (*m).to_string())
            .collect(),
    };
    Outcome::Reply(ResponseFrame::ok(
        id,
        serde_json::to_value(result).unwrap_or_default(),
    ))
}

fn handle_wake(params: serde_json::Value) -> Result<serde_json::Value, ErrorShape> {
    let params: WakeParams = parse_params(params)?;
    tracing::info!(keyword = %params.keyword, patience_ms = params.patience_ms, "voice wake requested");
    Ok(serde_json::json!({
        "active": true,
        "stream_id": params.audio_stream_id,
    }))
}

fn handle_talk_mode(params: serde_json::Value) -> Result<serde_json::Value, ErrorShape> {
    let params: TalkModeParams = parse_params(params)?;
    tracing::info!(
        enabled = params.enabled,
        patience_ms = params.patience_ms,
        auto_extend = params.auto_extend,
        "talk mode changed"
    );
    Ok(serde_json::json!({
        "active": params.enabled,
        "started_at": Utc::now(),
    }))
}

fn handle_exec_request(
    service: &Arc<KernelService>,
    params: serde_json::Value,
) -> Result<serde_json::Value, ErrorShape> {
    let params: ExecRequestParams = parse_params(params)?;
    if !params.actions.is_null() && !params.actions.is_array() {
        return Err(ErrorShape::new(
            ERR_INVALID_PARAMS,
            "actions must be an array",
        ));
    }

    let mut proposal = Proposal::new(params.intent);
    if !params.request_id.is_empty() {
        proposal.id = params.request_id;
    }
    proposal.trace_id = params.trace_id;
    proposal.override_risk = params.override_risk;
    if !params.expected_window.is_empty() {
        proposal.expected_window = Some(params.expected_window);
    }
    proposal.actions = parse_actions(&params.actions);

    let outcome = service
        .request_permission(proposal)
        .map_err(internal_error)?;

    let result = ExecResult {
        request_id: outcome.request_id,
        approved: outcome.approved,
        reason: outcome.reason,
        trust_score: outcome.trust_score,
        error_code: outcome.error_code,
        status: outcome.status.map(|s| s.as_str().to_string()),
    };
    serde_json::to_value(result).map_err(|e| ErrorShape::new(ERR_INTERNAL, e.to_string()))
}

fn handle_exec_resolve(
    service: &Arc<KernelService>,
    params: serde_json::Value,
) -> Result<serde_json::Value, ErrorShape> {
    let params: ExecResolveParams = parse_params(params)?;
    tracing::info!(
        request_id = %params.request_id,
        approved = params.approved,
        user_id = %params.user_id,
        "approval resolved via gateway"
    );
    match service.coordinator().decide(&params.request_id, params.approved) {
        Ok(record) => Ok(serde_json::json!({
            "success": true,
            "status": record.status.as_str(),
        })),
        Err(DaemonError::ProposalNotFound { id }) => Err(ErrorShape::new(
            ERR_INVALID_PARAMS,
            format!("proposal not found: {id}"),
        )),
        Err(DaemonError::InvalidTransition { from, .. }) => Err(ErrorShape::new(
            ERR_INVALID_REQUEST,
            format!("proposal is not awaiting a decision (status {from})"),
        )),
        Err(other) => Err(internal_error(other)),
    }
}

fn handle_memory_store(
    service: &Arc<KernelService>,
    params: serde_json::Value,
) -> Result<serde_json::Value, ErrorShape> {
    let params: MemoryStoreParams = parse_params(params)?;
    let vector = if params.vector.is_empty() {
        None
    } else {
        Some(params.vector.as_slice())
    };
    match service.memory_store(&params.key, &params.value, &params.context, vector) {
        Ok(artifact_id) => Ok(serde_json::json!({
            "success": true,
            "artifact_id": artifact_id,
        })),
        Err(error) => {
            tracing::error!(%error, "memory store failed");
            Err(ErrorShape::new(ERR_MEMORY, error.masked_reason()))
        }
    }
}

fn handle_memory_search(
    service: &Arc<KernelService>,
    params: serde_json::Value,
) -> Result<serde_json::Value, ErrorShape> {
    let params: MemorySearchParams = parse_params(params)?;
    let artifacts = service
        .memory_search(&params.vector, params.limit)
        .map_err(|error| {
            tracing::error!(%error, "memory search failed");
            ErrorShape::new(ERR_MEMORY, error.masked_reason())
        })?;

    let views: Vec<serde_json::Value> = artifacts
        .into_iter()
        .map(|artifact| {
            serde_json::json!({
                "id": artifact.id,
                "key": artifact.classification,
                "value": artifact.content,
                "context": artifact.summary,
                "created_at": artifact.timestamp,
            })
        })
        .collect();
    Ok(serde_json::json!({ "artifacts": views }))
}

fn handle_focus_update(
    service: &Arc<KernelService>,
    params: serde_json::Value,
) -> Result<serde_json::Value, ErrorShape> {
    let params: FocusUpdateParams = parse_params(params)?;
    service.report_focus(&params.window_name, &params.process_name);
    Ok(serde_json::json!({ "success": true }))
}

fn handle_session_snapshot(params: serde_json::Value) -> Result<serde_json::Value, ErrorShape> {
    let session_id = params
        .get("session_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    Ok(serde_json::json!({
        "session_id": session_id,
        "conversation_id": uuid::Uuid::new_v4().to_string(),
        "created_at": Utc::now(),
        "last_active_at": Utc::now(),
    }))
}

fn handle_session_update(
    service: &Arc<KernelService>,
    params: serde_json::Value,
) -> Result<serde_json::Value, ErrorShape> {
    let params: SessionUpdateParams = parse_params(params)?;
    service.publish_session_update(
        &params.session_id,
        &params.message_id,
        &params.delta,
        params.is_complete,
        &params.role,
    );
    Ok(serde_json::json!({ "success": true }))
}

fn handle_registry_snapshot(registry: &ClientRegistry) -> Result<serde_json::Value, ErrorShape> {
    let clients: Vec<ClientInfo> = registry
        .read()
        .map_err(|_| ErrorShape::new(ERR_INTERNAL, "registry lock poisoned"))?
        .iter()
        .map(|(id, client)| ClientInfo {
            id: id.clone(),
            r#type: client.client_type.as_str(),
            capabilities: client
                .client_type
                .capabilities()
                .iter()
                .map(|m| (*m).to_string())
                .collect(),
            connected_at: client.connected_at,
        })
        .collect();
    Ok(serde_json::json!({
        "clients": clients,
        "timestamp": Utc::now(),
    }))
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: serde_json::Value,
) -> Result<T, ErrorShape> {
    serde_json::from_value(params)
        .map_err(|e| ErrorShape::new(ERR_INVALID_PARAMS, format!("invalid params: {e}")))
}

fn internal_error(error: DaemonError) -> ErrorShape {
    tracing::error!(%error, "internal error");
    ErrorShape::new(ERR_INTERNAL, error.masked_reason())
}

/// Accepts both shapes the planner sends: structured items with a `payload`
/// object, and flat items where every non-`type` key is payload. Items
/// without a `type` are skipped.
fn parse_actions(value: &serde_json::Value) -> Vec<Action> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let object = item.as_object()?;
            let action_type = object.get("type")?.as_str()?;
            let mut action = Action::new(action_type);

            if let Some(payload) = object.get("payload").and_then(|p| p.as_object()) {
                for (key, value) in payload {
                    action.payload.insert(key.clone(), stringify(value));
                }
            } else {
                for (key, value) in object {
                    if key == "type" || key == "risk_level" {
                        continue;
                    }
                    action.payload.insert(key.clone(), stringify(value));
                }
            }

            if let Some(risk) = object.get("risk_level").and_then(serde_json::Value::as_u64) {
                if risk > 0 {
                    action.risk = Some(RiskLevel::from_score(risk.min(10) as u8));
                }
            }
            Some(action)
        })
        .collect()
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
