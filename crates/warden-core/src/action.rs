//! Action vocabulary and risk scale.
//!
//! Every proposal is an ordered list of [`Action`]s. The action type set is a
//! closed allowlist: anything the planner invents outside of it is rejected
//! by the validator before any other rule runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The closed allowlist of action types the kernel will consider.
///
/// Types outside this set are rejected with [`RiskLevel::Critical`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    /// Single key press.
    Key,
    /// Type a string of text.
    Type,
    /// Mouse click on a target.
    Click,
    /// Pause for a duration.
    Wait,
    /// Spoken output. Payload text is exempt from the keyword sweep.
    Speak,
    /// Write a fact into the memory store.
    Memorize,
    /// Visual scan of the current window.
    Scan,
    /// List a directory.
    List,
    /// Read a file.
    Read,
    /// Search within a directory.
    Search,
    /// Write a file.
    Write,
    /// Edit a file in place.
    Edit,
}

impl ActionType {
    /// Parses an action type case-insensitively.
    ///
    /// Returns `None` for anything outside the allowlist.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "KEY" => Some(Self::Key),
            "TYPE" => Some(Self::Type),
            "CLICK" => Some(Self::Click),
            "WAIT" => Some(Self::Wait),
            "SPEAK" => Some(Self::Speak),
            "MEMORIZE" => Some(Self::Memorize),
            "SCAN" => Some(Self::Scan),
            "LIST" => Some(Self::List),
            "READ" => Some(Self::Read),
            "SEARCH" => Some(Self::Search),
            "WRITE" => Some(Self::Write),
            "EDIT" => Some(Self::Edit),
            _ => None,
        }
    }

    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Key => "KEY",
            Self::Type => "TYPE",
            Self::Click => "CLICK",
            Self::Wait => "WAIT",
            Self::Speak => "SPEAK",
            Self::Memorize => "MEMORIZE",
            Self::Scan => "SCAN",
            Self::List => "LIST",
            Self::Read => "READ",
            Self::Search => "SEARCH",
            Self::Write => "WRITE",
            Self::Edit => "EDIT",
        }
    }

    /// Default risk level when the planner does not declare one.
    #[must_use]
    pub const fn base_risk(self) -> RiskLevel {
        match self {
            Self::Wait | Self::Speak | Self::Memorize | Self::Scan => RiskLevel::None,
            Self::Key | Self::Type | Self::Click | Self::List | Self::Search => RiskLevel::Low,
            Self::Read => RiskLevel::Medium,
            Self::Write | Self::Edit => RiskLevel::High,
        }
    }

    /// Whether this action type touches the file system and therefore goes
    /// through path validation.
    #[must_use]
    pub const fn touches_files(self) -> bool {
        matches!(
            self,
            Self::Read | Self::Write | Self::Edit | Self::List | Self::Search
        )
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action risk on the 0..10 scale.
///
/// The proposal-level score the auto-approve rule reads is a separate 0..100
/// scale supplied by the planner; see
/// [`AUTO_APPROVE_RISK_CEILING`](crate::proposal::AUTO_APPROVE_RISK_CEILING).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// No observable side effect.
    #[default]
    None,
    /// Reversible UI interaction.
    Low,
    /// Reads data or moves state the user can see.
    Medium,
    /// Mutates files or submits data. Requires an explicit override.
    High,
    /// Destructive or credential-adjacent.
    Critical,
}

impl RiskLevel {
    /// Numeric value on the 0..10 scale.
    #[must_use]
    pub const fn score(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::Medium => 3,
            Self::High => 7,
            Self::Critical => 10,
        }
    }

    /// Maps a numeric score back to the nearest level at or below it.
    #[must_use]
    pub const fn from_score(score: u8) -> Self {
        match score {
            0 => Self::None,
            1..=2 => Self::Low,
            3..=6 => Self::Medium,
            7..=9 => Self::High,
            _ => Self::Critical,
        }
    }
}

/// A single proposed action: a type tag plus a string payload map.
///
/// The `action_type` is kept as the raw string the planner sent so that
/// allowlist rejections can name the offending type verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Raw action type as submitted. Validated against [`ActionType`].
    #[serde(rename = "type")]
    pub action_type: String,
    /// Type-dependent payload. File-touching actions carry `path` (or
    /// `directory` for SEARCH).
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
    /// Planner-declared risk, overriding the type default when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
}

impl Action {
    /// Builds an action with an empty payload.
    #[must_use]
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: BTreeMap::new(),
            risk: None,
        }
    }

    /// Adds a payload entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Parsed action type, if within the allowlist.
    #[must_use]
    pub fn kind(&self) -> Option<ActionType> {
        ActionType::parse(&self.action_type)
    }

    /// Effective risk: the declared override when present, else the type
    /// default. An explicit declaration wins in both directions, including
    /// `None`.
    ///
    /// Unknown types never reach this point (the allowlist check rejects
    /// them first), but default to [`RiskLevel::Low`] defensively.
    #[must_use]
    pub fn effective_risk(&self) -> RiskLevel {
        if let Some(declared) = self.risk {
            return declared;
        }
        self.kind().map_or(RiskLevel::Low, ActionType::base_risk)
    }
}
