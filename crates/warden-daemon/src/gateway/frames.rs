//! JSON-RPC 2.0 frame types and error codes for the gateway plane.
//!
//! One persistent TCP connection per client, newline-delimited JSON frames:
//! requests carry `id` + `method` + `params`, responses carry `result` xor
//! `error`, server-pushed events carry `method` + `params` and no `id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON-RPC version tag carried on every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Gateway protocol version reported in `connect` results.
pub const GATEWAY_VERSION: &str = "1.0.0";

// Standard JSON-RPC error codes.
/// Malformed JSON.
pub const ERR_PARSE: i32 = -32700;
/// Frame is not a valid request.
pub const ERR_INVALID_REQUEST: i32 = -32600;
/// Unknown method.
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
/// Parameters do not match the method.
pub const ERR_INVALID_PARAMS: i32 = -32602;
/// Internal failure.
pub const ERR_INTERNAL: i32 = -32603;

// Domain error codes (application range).
/// Token mismatch or missing `connect`.
pub const ERR_AUTH_FAILED: i32 = -32001;
/// Method outside the client's capability set.
pub const ERR_PERMISSION_DENIED: i32 = -32002;
/// Focus gate failure.
pub const ERR_FOCUS_MISMATCH: i32 = -32003;
/// Risk gate failure.
pub const ERR_RISK_BLOCKED: i32 = -32004;
/// Request deadline exceeded.
pub const ERR_TIMEOUT: i32 = -32005;
/// Voice subsystem failure.
pub const ERR_VOICE: i32 = -32006;
/// Memory store failure.
pub const ERR_MEMORY: i32 = -32007;

/// An incoming request frame.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestFrame {
    /// Must be `"2.0"`.
    #[serde(default)]
    pub jsonrpc: String,
    /// Request identifier; echoed on the response.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    /// Method name.
    #[serde(default)]
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// An outgoing response frame.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFrame {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Echoed request id.
    pub id: Option<serde_json::Value>,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure payload, mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    /// Success response.
    #[must_use]
    pub fn ok(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    #[must_use]
    pub fn fail(id: Option<serde_json::Value>, error: ErrorShape) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A server-pushed event frame (no id).
#[derive(Debug, Clone, Serialize)]
pub struct EventFrame {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Event name.
    pub method: String,
    /// Event payload.
    pub params: serde_json::Value,
}

impl EventFrame {
    /// Builds an event frame.
    #[must_use]
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Numeric code from the fixed table.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorShape {
    /// Builds an error payload.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Connected client species, determining the capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// The planner.
    Brain,
    /// The OS integration layer.
    Sentinel,
    /// The voice front-end.
    Ears,
    /// Anything else (control UI, mobile shells). Reduced set.
    External,
}

impl ClientType {
    /// Parses the wire form; unknown types read as `External`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "brain" => Self::Brain,
            "sentinel" => Self::Sentinel,
            "ears" => Self::Ears,
            _ => Self::External,
        }
    }

    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Brain => "brain",
            Self::Sentinel => "sentinel",
            Self::Ears => "ears",
            Self::External => "external",
        }
    }

    /// The method allowlist for this client type. Dispatch rejects anything
    /// outside it with [`ERR_PERMISSION_DENIED`].
    #[must_use]
    pub const fn capabilities(self) -> &'static [&'static str] {
        match self {
            Self::Brain => &[
                "exec.request",
                "memory.store",
                "memory.search",
                "session.snapshot",
                "session.update",
                "registry.snapshot",
            ],
            Self::Sentinel => &["focus.update"],
            Self::Ears => &["wake", "talk_mode"],
            // The approval UI connects as an external client; it may resolve
            // held proposals but submits nothing.
            Self::External => &[
                "wake",
                "talk_mode",
                "session.snapshot",
                "exec.resolve",
                "registry.snapshot",
            ],
        }
    }
}

// --- Method parameter / result shapes --------------------------------------

/// `connect` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectParams {
    /// The shared secret.
    #[serde(default)]
    pub token: String,
    /// Client-chosen identifier (informational).
    #[serde(default)]
    pub client_id: String,
    /// brain | sentinel | ears | external
    #[serde(default)]
    pub client_type: String,
    /// Client's protocol version (informational).
    #[serde(default)]
    pub protocol_version: String,
}

/// `connect` result.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectResult {
    /// Server-assigned session id.
    pub session_id: String,
    /// Gateway protocol version.
    pub server_version: &'static str,
    /// Session expiry.
    pub expires_at: DateTime<Utc>,
    /// Methods this client may call.
    pub capabilities: Vec<String>,
}

/// `wake` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct WakeParams {
    /// Wake phrase.
    #[serde(default)]
    pub keyword: String,
    /// Microphone source.
    #[serde(default)]
    pub audio_stream_id: String,
    /// Listening patience in milliseconds.
    #[serde(default)]
    pub patience_ms: u64,
}

/// `talk_mode` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TalkModeParams {
    /// Enable or disable continuous listening.
    #[serde(default)]
    pub enabled: bool,
    /// Session the mode applies to.
    #[serde(default)]
    pub session_id: String,
    /// Listening patience in milliseconds.
    #[serde(default)]
    pub patience_ms: u64,
    /// Extend the window on slow speech.
    #[serde(default)]
    pub auto_extend: bool,
}

/// `exec.request` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequestParams {
    /// Caller-chosen request id; generated when absent.
    #[serde(default)]
    pub request_id: String,
    /// The intent.
    #[serde(default)]
    pub intent: String,
    /// Raw action list (flat or structured items).
    #[serde(default)]
    pub actions: serde_json::Value,
    /// Focus gate input.
    #[serde(default)]
    pub expected_window: String,
    /// Planner-scale risk hint (unused by validation; audit context only).
    #[serde(default)]
    pub risk_level: i64,
    /// Correlation id.
    #[serde(default)]
    pub trace_id: String,
    /// High-risk override flag.
    #[serde(default, rename = "override")]
    pub override_risk: bool,
}

/// `exec.resolve` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecResolveParams {
    /// Proposal id.
    #[serde(default)]
    pub request_id: String,
    /// The user's decision.
    #[serde(default)]
    pub approved: bool,
    /// Optional rationale (audit context).
    #[serde(default)]
    pub reason: String,
    /// Who decided.
    #[serde(default)]
    pub user_id: String,
}

/// `exec.request` result.
#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    /// Proposal id.
    pub request_id: String,
    /// Cleared to execute now.
    pub approved: bool,
    /// Denial or hold reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Trust for (intent, focus).
    pub trust_score: i64,
    /// Machine-readable denial code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Persisted lifecycle status, when a record exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// `memory.store` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryStoreParams {
    /// Fact key.
    #[serde(default)]
    pub key: String,
    /// Fact value.
    #[serde(default)]
    pub value: String,
    /// Fact context.
    #[serde(default)]
    pub context: String,
    /// Optional embedding.
    #[serde(default)]
    pub vector: Vec<f32>,
}

/// `memory.search` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySearchParams {
    /// Text query (requires an embedding service; unsupported here).
    #[serde(default)]
    pub query: String,
    /// Embedding to search by.
    #[serde(default)]
    pub vector: Vec<f32>,
    /// Maximum results.
    #[serde(default)]
    pub limit: usize,
}

/// `focus.update` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct FocusUpdateParams {
    /// Focused window title.
    #[serde(default)]
    pub window_name: String,
    /// Owning process.
    #[serde(default)]
    pub process_name: String,
}

/// `session.update` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionUpdateParams {
    /// Session id.
    #[serde(default)]
    pub session_id: String,
    /// Message id.
    #[serde(default)]
    pub message_id: String,
    /// Incremental text chunk.
    #[serde(default)]
    pub delta: String,
    /// Final chunk marker.
    #[serde(default)]
    pub is_complete: bool,
    /// Speaker role.
    #[serde(default)]
    pub role: String,
}

/// One registered client, as reported by `registry.snapshot`.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    /// Session id.
    pub id: String,
    /// Client species.
    pub r#type: &'static str,
    /// Method allowlist.
    pub capabilities: Vec<String>,
    /// Connection time.
    pub connected_at: DateTime<Utc>,
}
