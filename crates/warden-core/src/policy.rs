//! The policy validator: every proposed action passes through here before it
//! can reach the action stream.
//!
//! The rule order is fixed and short-circuits on the first denial:
//!
//! 1. system paused
//! 2. action-type allowlist
//! 3. path safety for file-touching actions
//! 4. blocked-keyword sweep (SPEAK payloads exempt)
//! 5. risk scoring (max across actions)
//! 6. override gate at high risk
//! 7. focus gate against the expected window
//!
//! Every exit point emits exactly one [`AuditEntry`] through the sink before
//! the decision is returned. Denials are ordinary return values; the
//! validator has no error type.

use std::sync::Arc;

use chrono::Utc;

use crate::action::{Action, ActionType, RiskLevel};
use crate::audit::AuditEntry;
use crate::focus::FocusSnapshot;
use crate::modes::SystemMode;
use crate::proposal::{Decision, Proposal};

/// Machine-readable code attached to focus-gate denials.
pub const ERROR_CODE_FOCUS_MISMATCH: &str = "FOCUS_MISMATCH";

/// Keywords that trigger automatic rejection wherever they appear in an
/// action type, payload value, or the intent itself.
///
/// Entries with trailing spaces ("rm ", "format ") are deliberate: they catch
/// the command form without tripping on words like "confirm" or "format" used
/// as a noun inside SPEAK text (which is exempt anyway).
pub const DEFAULT_BLOCKED_KEYWORDS: &[&str] = &[
    "delete",
    "rm ",
    "format ",
    "shutdown",
    "reboot",
    "sudo",
    "password",
    "credential",
    "secret",
    "api_key",
    "token",
    "credit_card",
    "ssn",
    "rm -rf",
    "drop_table",
    "delete_all",
    "fdisk",
];

/// Tunable policy inputs, sourced from the security section of the config.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// When false, the keyword sweep is disabled. The allowlist, path, risk,
    /// and focus rules always run.
    pub safe_mode: bool,
    /// Lower-cased substrings swept against types, payloads, and intents.
    pub blocked_keywords: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            safe_mode: true,
            blocked_keywords: DEFAULT_BLOCKED_KEYWORDS
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
        }
    }
}

/// Read access to historical trust counts.
///
/// The trust store is updated by the dispatch path, never by the validator;
/// passing it in as a trait keeps the dependency one-directional.
pub trait TrustReader: Send + Sync {
    /// Successful completion count for the pair, 0 when unseen.
    fn trust_score(&self, intent: &str, focused_window: &str) -> i64;
}

/// Receives exactly one entry per validation.
pub trait AuditSink: Send + Sync {
    /// Appends an audit entry.
    fn record(&self, entry: AuditEntry);
}

impl AuditSink for crate::audit::AuditRing {
    fn record(&self, entry: AuditEntry) {
        crate::audit::AuditRing::record(self, entry);
    }
}

/// A trust reader that always reports zero. Useful in tests and before the
/// store is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrust;

impl TrustReader for NoTrust {
    fn trust_score(&self, _intent: &str, _focused_window: &str) -> i64 {
        0
    }
}

/// Validates proposals against the fixed rule chain.
pub struct Validator {
    config: PolicyConfig,
    trust: Arc<dyn TrustReader>,
    audit: Arc<dyn AuditSink>,
}

impl Validator {
    /// Builds a validator over the given trust reader and audit sink.
    #[must_use]
    pub fn new(config: PolicyConfig, trust: Arc<dyn TrustReader>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            config,
            trust,
            audit,
        }
    }

    /// Validates a proposal against the current focus and system mode.
    ///
    /// Exactly one audit entry is recorded per call, whatever the outcome.
    pub fn validate(
        &self,
        proposal: &Proposal,
        focus: &FocusSnapshot,
        system_mode: SystemMode,
    ) -> Decision {
        // Paused means everything is denied before any rule runs.
        if system_mode == SystemMode::Paused {
            return self.finish(proposal, Decision::deny("paused", RiskLevel::None));
        }

        // Rules: closed allowlist, then path safety, per action. Both must
        // clear for every action before the keyword sweep runs.
        let mut kinds = Vec::with_capacity(proposal.actions.len());
        for (index, action) in proposal.actions.iter().enumerate() {
            let Some(kind) = action.kind() else {
                let decision = Decision::deny(
                    format!("action type '{}' is not allowed", action.action_type),
                    RiskLevel::Critical,
                );
                return self.finish(proposal, decision);
            };

            if let Err(reason) = validate_action_path(kind, action) {
                let decision = Decision::deny(
                    format!("path validation failed for action {index}: {reason}"),
                    RiskLevel::Critical,
                );
                return self.finish(proposal, decision);
            }

            kinds.push(kind);
        }

        // Rule: keyword sweep over the intent itself, then each action's
        // type tag and payload values. Spoken text is exempt: conversational
        // replies legitimately contain substrings like "confirm" that embed
        // "rm ".
        if self.config.safe_mode {
            if let Some(keyword) = self.find_keyword(&proposal.intent) {
                let decision = Decision::deny(
                    format!("intent contains blocked keyword '{keyword}'"),
                    RiskLevel::Critical,
                );
                return self.finish(proposal, decision);
            }
            for (index, (action, kind)) in proposal.actions.iter().zip(&kinds).enumerate() {
                if let Some(keyword) = self.sweep_action(*kind, action) {
                    let decision = Decision::deny(
                        format!("action {index} contains blocked keyword '{keyword}'"),
                        RiskLevel::Critical,
                    );
                    return self.finish(proposal, decision);
                }
            }
        }

        // Rule: risk scoring, the worst action in the plan.
        let max_risk = proposal
            .actions
            .iter()
            .map(Action::effective_risk)
            .max()
            .unwrap_or(RiskLevel::None);

        let trust_score = self
            .trust
            .trust_score(&proposal.intent, &focus.window_title);

        // Rule: focus gate.
        if let Some(expected) = proposal
            .expected_window
            .as_deref()
            .filter(|w| !w.is_empty())
        {
            if !focus.matches(expected) {
                let mut decision = Decision::deny(
                    format!(
                        "focus mismatch: expected '{expected}', got '{}'",
                        focus.window_title
                    ),
                    max_risk,
                )
                .with_code(ERROR_CODE_FOCUS_MISMATCH);
                decision.trust_score = trust_score;
                return self.finish(proposal, decision);
            }
        }

        let mut decision = Decision::allow(max_risk, trust_score, proposal.override_risk);

        // Rule: high risk requires the explicit override flag. Without it the
        // plan is still valid, but it cannot auto-approve; the reason rides
        // along so the hold names the gate. The flag bypasses nothing that
        // already ran.
        if max_risk >= RiskLevel::High && !proposal.override_risk {
            decision.reason = Some(format!(
                "high-risk action (level {}) requires explicit override",
                max_risk.score()
            ));
        }

        self.finish(proposal, decision)
    }

    /// Records the audit entry for this validation and hands the decision
    /// back. Single exit point so the one-entry-per-validation invariant is
    /// structural.
    fn finish(&self, proposal: &Proposal, decision: Decision) -> Decision {
        self.audit.record(AuditEntry {
            timestamp: Utc::now(),
            request_id: proposal.id.clone(),
            intent: proposal.intent.clone(),
            risk_level: decision.risk_level,
            blocked: decision.blocked,
            reason: decision.reason.clone(),
            override_risk: proposal.override_risk,
        });

        if decision.blocked {
            tracing::warn!(
                request_id = %proposal.id,
                trace_id = %proposal.trace_id,
                intent = %proposal.intent,
                risk = decision.risk_level.score(),
                reason = decision.reason.as_deref().unwrap_or(""),
                "proposal blocked"
            );
        } else {
            tracing::info!(
                request_id = %proposal.id,
                trace_id = %proposal.trace_id,
                intent = %proposal.intent,
                risk = decision.risk_level.score(),
                trust = decision.trust_score,
                "proposal validated"
            );
        }

        decision
    }

    /// First blocked keyword found in `haystack`, if any.
    fn find_keyword(&self, haystack: &str) -> Option<String> {
        let lowered = haystack.to_lowercase();
        self.config
            .blocked_keywords
            .iter()
            .find(|keyword| lowered.contains(keyword.to_lowercase().as_str()))
            .cloned()
    }

    /// Sweeps one action's type tag and payload values.
    fn sweep_action(&self, kind: ActionType, action: &Action) -> Option<String> {
        if let Some(keyword) = self.find_keyword(kind.as_str()) {
            return Some(keyword);
        }
        if kind == ActionType::Speak {
            return None;
        }
        action
            .payload
            .values()
            .find_map(|value| self.find_keyword(value))
    }
}

/// Checks the path rules for one action. Non-file actions pass trivially.
fn validate_action_path(kind: ActionType, action: &Action) -> Result<(), String> {
    if !kind.touches_files() {
        return Ok(());
    }

    // SEARCH scopes by directory; LIST prefers directory with a path
    // fallback; the rest take a file path.
    let key = match kind {
        ActionType::Search => "directory",
        ActionType::List => {
            if action.payload.contains_key("directory") {
                "directory"
            } else {
                "path"
            }
        }
        _ => "path",
    };

    let Some(raw) = action.payload.get(key) else {
        return Err(format!("{kind} action missing required key '{key}'"));
    };
    if raw.is_empty() {
        return Err(format!("{kind} action missing required key '{key}'"));
    }
    if !is_safe_path(raw) {
        return Err(format!("unsafe path '{raw}' (must be relative and safe)"));
    }
    Ok(())
}

/// A path is safe when it is relative, free of drive-letter prefixes, and
/// never names the parent directory.
#[must_use]
pub fn is_safe_path(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') {
        return false;
    }
    // Windows drive prefix (`C:`), regardless of platform.
    if path.len() > 1 && path.as_bytes()[1] == b':' {
        return false;
    }
    // Any `..` is rejected outright rather than normalised: traversal via
    // `a/../../b` and plain `..` both fail this check.
    if path.contains("..") {
        return false;
    }
    true
}
