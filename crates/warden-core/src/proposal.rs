//! Proposals, their persisted lifecycle, and validation decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{Action, RiskLevel};

/// Proposal-scale risk ceiling for auto-approval (0..100 scale).
///
/// AUTO mode auto-approves only below this score; the per-action 0..10 scale
/// is mapped onto it by multiplying by ten.
pub const AUTO_APPROVE_RISK_CEILING: u8 = 30;

/// An immutable request from the planner: an intent plus an ordered list of
/// actions awaiting a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Opaque identifier (UUID).
    pub id: String,
    /// Natural-language statement of what the plan is for.
    pub intent: String,
    /// Ordered action list. May be empty (an empty plan is trivially safe).
    #[serde(default)]
    pub actions: Vec<Action>,
    /// When non-empty, the focused window title must contain this string
    /// (case-insensitive) for the proposal to pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_window: Option<String>,
    /// Correlation id threaded through logs and the action stream.
    #[serde(default)]
    pub trace_id: String,
    /// Planner-supplied flag unlocking high-risk actions. Does not bypass
    /// the allowlist or path checks.
    #[serde(default)]
    pub override_risk: bool,
}

impl Proposal {
    /// Builds a proposal with a fresh UUID and the given intent.
    #[must_use]
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            intent: intent.into(),
            actions: Vec::new(),
            expected_window: None,
            trace_id: String::new(),
            override_risk: false,
        }
    }

    /// Appends an action.
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Maximum effective risk across the action list.
    #[must_use]
    pub fn max_risk(&self) -> RiskLevel {
        self.actions
            .iter()
            .map(Action::effective_risk)
            .max()
            .unwrap_or(RiskLevel::None)
    }
}

/// Approval state of a persisted proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    /// Freshly created, or reactivated after a clarification reply.
    Pending,
    /// Held for a yes/no decision from the user.
    WaitingForUser,
    /// Held for a free-text reply from the user.
    WaitingForContext,
    /// Cleared for execution.
    Approved,
    /// Declined by the user.
    Rejected,
    /// In flight on the action stream.
    Executing,
    /// Terminal: the Sentinel reported success.
    Completed,
    /// Terminal: the Sentinel reported failure.
    Failed,
}

impl ProposalStatus {
    /// Canonical storage form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::WaitingForUser => "WAITING_FOR_USER",
            Self::WaitingForContext => "WAITING_FOR_CONTEXT",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parses the storage form.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "WAITING_FOR_USER" => Some(Self::WaitingForUser),
            "WAITING_FOR_CONTEXT" => Some(Self::WaitingForContext),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "EXECUTING" => Some(Self::Executing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Only proposals in these states may be drained into the action stream.
    #[must_use]
    pub const fn is_dispatchable(self) -> bool {
        matches!(self, Self::Approved | Self::Executing)
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of user interaction a held proposal needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionType {
    /// Yes/no approval decision.
    #[default]
    Permission,
    /// Open-ended context gathering; the agent asked the user a question.
    Clarification,
}

impl InteractionType {
    /// Canonical storage form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Permission => "PERMISSION",
            Self::Clarification => "CLARIFICATION",
        }
    }

    /// Parses the storage form; unknown values fall back to `Permission`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw == "CLARIFICATION" {
            Self::Clarification
        } else {
            Self::Permission
        }
    }
}

/// Persisted form of a proposal, as stored in `action_proposals`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
    /// Opaque identifier.
    pub id: String,
    /// The proposal's intent.
    pub intent: String,
    /// Planner-scale risk, 0..100.
    pub risk_score: u8,
    /// Current lifecycle state.
    pub status: ProposalStatus,
    /// Serialised plan (the action list, JSON).
    pub payload: serde_json::Value,
    /// Application domain the user-mode lookup keys on. `"*"` is global.
    pub domain: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
    /// Stamped when the proposal transitions to `APPROVED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    /// Permission vs clarification.
    pub interaction_type: InteractionType,
    /// The agent's question, for clarification requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_message: Option<String>,
    /// The user's free-text reply, once given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_response: Option<String>,
}

impl ProposalRecord {
    /// Builds a fresh permission-type record in `PENDING` state.
    #[must_use]
    pub fn new_permission(
        intent: impl Into<String>,
        risk_score: u8,
        payload: serde_json::Value,
        domain: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            intent: intent.into(),
            risk_score,
            status: ProposalStatus::Pending,
            payload,
            domain: domain.into(),
            created_at: now,
            updated_at: now,
            approved_at: None,
            interaction_type: InteractionType::Permission,
            agent_message: None,
            user_response: None,
        }
    }

    /// Builds a clarification record, held for context from the start.
    ///
    /// Clarifications carry no actions and no risk.
    #[must_use]
    pub fn new_clarification(
        intent: impl Into<String>,
        agent_message: impl Into<String>,
        payload: serde_json::Value,
        domain: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            intent: intent.into(),
            risk_score: 0,
            status: ProposalStatus::WaitingForContext,
            payload,
            domain: domain.into(),
            created_at: now,
            updated_at: now,
            approved_at: None,
            interaction_type: InteractionType::Clarification,
            agent_message: Some(agent_message.into()),
            user_response: None,
        }
    }

    /// Whether this record auto-approves under the given automation mode.
    ///
    /// MANUAL never auto-approves; AUTO approves below the risk ceiling.
    #[must_use]
    pub fn should_auto_approve(&self, mode: crate::modes::AutomationMode) -> bool {
        match mode {
            crate::modes::AutomationMode::Manual => false,
            crate::modes::AutomationMode::Auto => self.risk_score < AUTO_APPROVE_RISK_CEILING,
        }
    }
}

/// The kernel's synchronous verdict on a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// The proposal passed every rule.
    pub valid: bool,
    /// The proposal was denied outright.
    pub blocked: bool,
    /// Names the failing rule when blocked, or carries status context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Maximum action risk (0..10 scale).
    pub risk_level: RiskLevel,
    /// Historical trust for (intent, focused window).
    pub trust_score: i64,
    /// Echo of the planner's override flag.
    pub override_risk: bool,
    /// Machine-readable code for specific denials (e.g. `FOCUS_MISMATCH`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl Decision {
    /// A passing decision.
    #[must_use]
    pub fn allow(risk_level: RiskLevel, trust_score: i64, override_risk: bool) -> Self {
        Self {
            valid: true,
            blocked: false,
            reason: None,
            risk_level,
            trust_score,
            override_risk,
            error_code: None,
        }
    }

    /// A denial naming the failing rule.
    #[must_use]
    pub fn deny(reason: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            valid: false,
            blocked: true,
            reason: Some(reason.into()),
            risk_level,
            trust_score: 0,
            override_risk: false,
            error_code: None,
        }
    }

    /// Attaches a machine-readable error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Whether the proposal may proceed (possibly after a human approval).
    #[must_use]
    pub const fn approved(&self) -> bool {
        self.valid && !self.blocked
    }
}
