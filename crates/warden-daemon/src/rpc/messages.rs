//! Protobuf messages and tag routing for the binary RPC plane.
//!
//! The messages are written inline with prost derives; there is no build
//! step. Frames are `[tag: u8][payload: protobuf]`, where the tag picks the
//! operation and tag 0 marks an error envelope on the response side.

use std::collections::HashMap;

use bytes::Bytes;
use prost::Message;
use warden_core::{Action, RiskLevel};

/// A focus report from the Sentinel.
#[derive(Clone, PartialEq, Message)]
pub struct FocusState {
    /// Focused window title.
    #[prost(string, tag = "1")]
    pub window_title: String,
    /// Owning process.
    #[prost(string, tag = "2")]
    pub process_name: String,
}

/// One proposed action.
#[derive(Clone, PartialEq, Message)]
pub struct ActionMessage {
    /// Action type tag.
    #[prost(string, tag = "1")]
    pub r#type: String,
    /// Type-dependent payload.
    #[prost(map = "string, string", tag = "2")]
    pub payload: HashMap<String, String>,
    /// Declared risk (0 = unset, use the type default).
    #[prost(uint32, tag = "3")]
    pub risk_level: u32,
}

impl ActionMessage {
    /// Converts to the domain action.
    #[must_use]
    pub fn into_action(self) -> Action {
        let mut action = Action::new(self.r#type);
        action.payload = self.payload.into_iter().collect();
        if self.risk_level > 0 {
            #[allow(clippy::cast_possible_truncation)] // clamped to 10
            let score = self.risk_level.min(10) as u8;
            action.risk = Some(RiskLevel::from_score(score));
        }
        action
    }

    /// Converts from the domain action.
    #[must_use]
    pub fn from_action(action: &Action) -> Self {
        Self {
            r#type: action.action_type.clone(),
            payload: action.payload.clone().into_iter().collect(),
            risk_level: action.risk.map_or(0, |r| u32::from(r.score())),
        }
    }
}

/// A permission request from the planner.
#[derive(Clone, PartialEq, Message)]
pub struct PermissionRequest {
    /// The intent.
    #[prost(string, tag = "1")]
    pub intent: String,
    /// Ordered action list.
    #[prost(message, repeated, tag = "2")]
    pub actions: Vec<ActionMessage>,
    /// Correlation id; doubles as the proposal id when non-empty.
    #[prost(string, tag = "3")]
    pub trace_id: String,
    /// Focus gate input.
    #[prost(string, tag = "4")]
    pub expected_window: String,
    /// High-risk override flag.
    #[prost(bool, tag = "5")]
    pub r#override: bool,
}

/// The kernel's verdict.
#[derive(Clone, PartialEq, Message)]
pub struct PermissionResponse {
    /// Cleared to execute now.
    #[prost(bool, tag = "1")]
    pub approved: bool,
    /// Denial or hold reason.
    #[prost(string, tag = "2")]
    pub reason: String,
    /// Trust for (intent, focus).
    #[prost(int64, tag = "3")]
    pub trust_score: i64,
    /// Machine-readable denial code.
    #[prost(string, tag = "4")]
    pub error_code: String,
    /// Persisted lifecycle status, when a record exists.
    #[prost(string, tag = "5")]
    pub status: String,
}

/// One command pushed down the action stream.
#[derive(Clone, PartialEq, Message)]
pub struct ActionCommand {
    /// `{proposal-id}-{index}`.
    #[prost(string, tag = "1")]
    pub command_id: String,
    /// The action to execute.
    #[prost(message, optional, tag = "2")]
    pub action: Option<ActionMessage>,
}

/// Current mode and focus.
#[derive(Clone, PartialEq, Message)]
pub struct SystemState {
    /// ACTIVE | SHADOW | PAUSED
    #[prost(string, tag = "1")]
    pub state: String,
    /// Focused window title.
    #[prost(string, tag = "2")]
    pub active_focus: String,
}

/// One held proposal.
#[derive(Clone, PartialEq, Message)]
pub struct PendingItem {
    /// Proposal id.
    #[prost(string, tag = "1")]
    pub action_id: String,
    /// Proposal intent.
    #[prost(string, tag = "2")]
    pub intent: String,
    /// Planner-scale risk (0..100).
    #[prost(uint32, tag = "3")]
    pub risk_score: u32,
    /// Lifecycle status.
    #[prost(string, tag = "4")]
    pub status: String,
    /// PERMISSION | CLARIFICATION
    #[prost(string, tag = "5")]
    pub interaction_type: String,
    /// The agent's question, for clarifications.
    #[prost(string, tag = "6")]
    pub agent_message: String,
}

/// The pending queue.
#[derive(Clone, PartialEq, Message)]
pub struct PendingList {
    /// Held proposals, oldest first.
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<PendingItem>,
}

/// The user's decision on a held proposal.
#[derive(Clone, PartialEq, Message)]
pub struct ApprovalDecision {
    /// Proposal id.
    #[prost(string, tag = "1")]
    pub action_id: String,
    /// Approve or reject.
    #[prost(bool, tag = "2")]
    pub approved: bool,
}

/// Mode change request. A recognised system mode (ACTIVE/SHADOW/PAUSED)
/// switches the kernel; AUTO/MANUAL sets the automation mode for `domain`
/// (empty domain means the global `'*'`).
#[derive(Clone, PartialEq, Message)]
pub struct ModeRequest {
    /// Application domain for automation modes.
    #[prost(string, tag = "1")]
    pub domain: String,
    /// ACTIVE | SHADOW | PAUSED | AUTO | MANUAL
    #[prost(string, tag = "2")]
    pub mode: String,
}

/// Generic acknowledgement.
#[derive(Clone, PartialEq, Message)]
pub struct Ack {
    /// Whether the operation took effect.
    #[prost(bool, tag = "1")]
    pub success: bool,
}

/// Empty request body.
#[derive(Clone, PartialEq, Message)]
pub struct Empty {}

/// Error envelope (response tag 0).
#[derive(Clone, PartialEq, Message)]
pub struct RpcError {
    /// Code from the shared error table.
    #[prost(int32, tag = "1")]
    pub code: i32,
    /// Human-readable message.
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Operations on the binary plane, identified by a leading tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RpcMethod {
    /// Client-streamed focus reports from the Sentinel.
    ReportFocus = 1,
    /// Unary permission request from the planner.
    RequestPermission = 2,
    /// Server-streamed action commands to the Sentinel.
    StreamActions = 3,
    /// Current mode and focus.
    GetSystemState = 4,
    /// The pending approval queue.
    GetPendingApprovals = 5,
    /// Apply a decision to a held proposal.
    ApproveAction = 6,
    /// Switch system or automation mode.
    SetSystemMode = 7,
}

impl RpcMethod {
    /// Parses a tag byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::ReportFocus),
            2 => Some(Self::RequestPermission),
            3 => Some(Self::StreamActions),
            4 => Some(Self::GetSystemState),
            5 => Some(Self::GetPendingApprovals),
            6 => Some(Self::ApproveAction),
            7 => Some(Self::SetSystemMode),
            _ => None,
        }
    }

    /// The tag byte.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

/// Encodes `[tag][protobuf]` into one frame payload.
#[must_use]
pub fn encode_tagged(tag: u8, message: &impl Message) -> Bytes {
    let mut buf = Vec::with_capacity(1 + message.encoded_len());
    buf.push(tag);
    message.encode(&mut buf).expect("Vec<u8> write cannot fail");
    Bytes::from(buf)
}
