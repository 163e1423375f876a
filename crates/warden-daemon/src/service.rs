//! The kernel service: one facade over the focus tracker, validator,
//! coordinator, trust store, and action stream.
//!
//! Every transport (binary RPC, JSON gateway, HTTP queue) is a thin adaptor
//! over these methods. Policy logic lives in `warden_core::policy`; lifecycle
//! logic lives in the coordinator; nothing is duplicated per transport.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use warden_core::{
    AuditEntry, AuditRing, AutomationMode, FocusTracker, KernelConfig, Proposal, ProposalRecord,
    ProposalStatus, RiskLevel, SystemMode, Validator,
};

use crate::coordinator::{ApprovalCoordinator, SubmitOutcome};
use crate::dispatch::ActionDispatcher;
use crate::error::DaemonError;
use crate::events::{event_bus, publish, EventBus, KernelEvent};
use crate::storage::{
    Artifact, ArtifactRepository, CommandRepository, IntentHistoryRepository, ProposalRepository,
    SharedConnection, StateRepository,
};

/// Result of a permission request, shaped for any transport to serialise.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionOutcome {
    /// Proposal identifier (echoes the request id).
    pub request_id: String,
    /// True when the plan is cleared to execute right now.
    pub approved: bool,
    /// True when the plan is parked for the user.
    pub held: bool,
    /// Persisted status, when a record was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProposalStatus>,
    /// Denial or hold reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Machine-readable denial code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Historical trust for (intent, focused window).
    pub trust_score: i64,
    /// Maximum action risk (0..10 scale).
    pub risk_level: RiskLevel,
}

/// The assembled kernel.
pub struct KernelService {
    focus: Arc<FocusTracker>,
    audit: Arc<AuditRing>,
    validator: Validator,
    proposals: ProposalRepository,
    history: IntentHistoryRepository,
    artifacts: ArtifactRepository,
    commands: CommandRepository,
    state: Arc<StateRepository>,
    coordinator: ApprovalCoordinator,
    dispatcher: Arc<ActionDispatcher>,
    events: EventBus,
    started_at: Instant,
    version: String,
}

impl KernelService {
    /// Assembles the kernel over an open database.
    pub fn new(conn: SharedConnection, config: &KernelConfig) -> Result<Arc<Self>, DaemonError> {
        let focus = Arc::new(FocusTracker::new());
        let audit = Arc::new(AuditRing::new());
        let history = IntentHistoryRepository::new(conn.clone());
        let proposals = ProposalRepository::new(conn.clone());
        let state = Arc::new(StateRepository::new(conn.clone())?);
        let dispatcher = Arc::new(ActionDispatcher::new());
        let events = event_bus();

        let validator = Validator::new(
            config.policy(),
            Arc::new(history.clone()),
            audit.clone(),
        );
        let coordinator = ApprovalCoordinator::new(
            proposals.clone(),
            history.clone(),
            dispatcher.clone(),
            state.clone(),
            events.clone(),
        );

        Ok(Arc::new(Self {
            focus,
            audit,
            validator,
            proposals,
            history,
            artifacts: ArtifactRepository::new(conn.clone()),
            commands: CommandRepository::new(conn),
            state,
            coordinator,
            dispatcher,
            events,
            started_at: Instant::now(),
            version: config.system.version.clone(),
        }))
    }

    // --- Sensory input -----------------------------------------------------

    /// Applies a focus report from the Sentinel and broadcasts the change.
    pub fn report_focus(&self, window_title: &str, process_name: &str) {
        self.focus.update(window_title, process_name);
        publish(
            &self.events,
            KernelEvent::FocusChanged {
                timestamp: chrono::Utc::now(),
                window_name: window_title.to_string(),
                process_name: process_name.to_string(),
            },
        );
        tracing::debug!(window = window_title, process = process_name, "focus updated");
    }

    // --- Cognition ---------------------------------------------------------

    /// The full permission pipeline: validate, then auto-resolve or hold.
    ///
    /// Denied proposals produce no persisted record and nothing on the
    /// action stream; the audit entry is the only trace.
    pub fn request_permission(&self, proposal: Proposal) -> Result<PermissionOutcome, DaemonError> {
        let snapshot = self.focus.snapshot();
        let system_mode = self.state.get();
        let decision = self.validator.validate(&proposal, &snapshot, system_mode);

        if !decision.approved() {
            return Ok(PermissionOutcome {
                request_id: proposal.id,
                approved: false,
                held: false,
                status: None,
                reason: decision.reason,
                error_code: decision.error_code,
                trust_score: decision.trust_score,
                risk_level: decision.risk_level,
            });
        }

        let request_id = proposal.id.clone();
        let intent = proposal.intent.clone();
        match self.resolve_approved(proposal, &decision) {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                // An internal failure after a passing validation still leaves
                // a blocked audit trace so the trail never loses a request.
                self.audit.record(AuditEntry {
                    timestamp: chrono::Utc::now(),
                    request_id,
                    intent,
                    risk_level: decision.risk_level,
                    blocked: true,
                    reason: Some("validator error".to_string()),
                    override_risk: false,
                });
                Err(error)
            }
        }
    }

    /// Persists a validated proposal and auto-resolves or holds it.
    fn resolve_approved(
        &self,
        proposal: Proposal,
        decision: &warden_core::Decision,
    ) -> Result<PermissionOutcome, DaemonError> {
        // The action scale is 0..10; the proposal scale the auto-approve
        // rule reads is 0..100.
        let risk_score = decision.risk_level.score().saturating_mul(10).min(100);
        let mut record = ProposalRecord::new_permission(
            proposal.intent.clone(),
            risk_score,
            serde_json::to_value(&proposal.actions)?,
            "*",
        );
        record.id.clone_from(&proposal.id);

        let mode = self.proposals.user_mode(&record.domain)?;
        let (record, outcome) = self
            .coordinator
            .submit(record, mode, proposal.override_risk)?;

        Ok(match outcome {
            SubmitOutcome::AutoApproved => PermissionOutcome {
                request_id: record.id,
                approved: true,
                held: false,
                status: Some(record.status),
                reason: None,
                error_code: None,
                trust_score: decision.trust_score,
                risk_level: decision.risk_level,
            },
            SubmitOutcome::Held => PermissionOutcome {
                request_id: record.id,
                approved: false,
                held: true,
                status: Some(ProposalStatus::WaitingForUser),
                // Surface the gate that forced the hold when there was one
                // (the override gate), else the generic hold reason.
                reason: decision
                    .reason
                    .clone()
                    .or_else(|| Some("waiting for user approval".to_string())),
                error_code: None,
                trust_score: decision.trust_score,
                risk_level: decision.risk_level,
            },
            SubmitOutcome::Rejected => PermissionOutcome {
                request_id: record.id,
                approved: false,
                held: false,
                status: Some(ProposalStatus::Rejected),
                reason: Some("paused".to_string()),
                error_code: None,
                trust_score: decision.trust_score,
                risk_level: decision.risk_level,
            },
        })
    }

    /// Planner-scale proposal path (0..100 risk, opaque payload).
    pub fn propose(
        &self,
        intent: &str,
        risk_score: u8,
        payload: serde_json::Value,
        domain: &str,
    ) -> Result<(ProposalRecord, SubmitOutcome), DaemonError> {
        let domain = if domain.is_empty() { "*" } else { domain };
        let record = ProposalRecord::new_permission(intent, risk_score, payload, domain);
        let mode = self.proposals.user_mode(domain)?;
        self.coordinator.submit(record, mode, false)
    }

    /// Clarification path: no actions, only a question for the user.
    /// Bypasses the policy rules and is held for context.
    pub fn request_clarification(
        &self,
        intent: &str,
        agent_message: &str,
        domain: &str,
    ) -> Result<ProposalRecord, DaemonError> {
        let domain = if domain.is_empty() { "*" } else { domain };
        let record = ProposalRecord::new_clarification(
            intent,
            agent_message,
            serde_json::Value::Object(serde_json::Map::new()),
            domain,
        );
        self.coordinator.submit_clarification(record)
    }

    // --- Reflexes ----------------------------------------------------------

    /// Cached plan for an intent, once trust clears the threshold.
    pub fn reflex(&self, intent: &str) -> Result<Option<(String, i64)>, DaemonError> {
        self.history.reflex(intent)
    }

    /// Drops every cached plan for an intent.
    pub fn invalidate_reflex(&self, intent: &str) -> Result<(), DaemonError> {
        self.history.invalidate(intent)
    }

    /// Trust count for an (intent, focus) pair.
    pub fn trust_score(&self, intent: &str, focused_window: &str) -> Result<i64, DaemonError> {
        self.history.trust_score(intent, focused_window)
    }

    // --- Memory ------------------------------------------------------------

    /// Stores a fact as a memory artifact, with an optional embedding.
    pub fn memory_store(
        &self,
        key: &str,
        value: &str,
        context: &str,
        vector: Option<&[f32]>,
    ) -> Result<String, DaemonError> {
        let mut artifact = Artifact::text(value);
        artifact.artifact_type = "memory".to_string();
        artifact.classification = Some(key.to_string());
        artifact.summary = Some(context.to_string());
        self.artifacts.save(&artifact)?;

        if let Some(vector) = vector {
            if !vector.is_empty() {
                let embedding = serde_json::to_string(vector)?;
                self.artifacts.enrich(&artifact.id, key, context, &embedding)?;
            }
        }
        tracing::info!(key, artifact_id = %artifact.id, "memory stored");
        Ok(artifact.id)
    }

    /// Similarity search over stored memories. Text-only queries return
    /// nothing: embedding computation is the planner's job.
    pub fn memory_search(&self, vector: &[f32], limit: usize) -> Result<Vec<Artifact>, DaemonError> {
        if vector.is_empty() {
            return Ok(Vec::new());
        }
        let limit = if limit == 0 { 10 } else { limit };
        self.artifacts.search_by_embedding(vector, limit)
    }

    // --- Control plane -----------------------------------------------------

    /// Current system mode plus the active focus title.
    #[must_use]
    pub fn system_state(&self) -> (SystemMode, String) {
        (self.state.get(), self.focus.window_title())
    }

    /// Switches the system mode.
    pub fn set_system_mode(&self, mode: SystemMode) -> Result<(), DaemonError> {
        self.state.set(mode)
    }

    /// Automation mode for a domain.
    pub fn user_mode(&self, domain: &str) -> Result<AutomationMode, DaemonError> {
        self.proposals.user_mode(domain)
    }

    /// Sets the automation mode for a domain.
    pub fn set_user_mode(&self, domain: &str, mode: AutomationMode) -> Result<(), DaemonError> {
        self.proposals.set_user_mode(domain, mode)
    }

    /// Recent audit entries, oldest first.
    #[must_use]
    pub fn audit_recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit.recent(limit)
    }

    /// Seconds since boot.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Reported kernel version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The approval coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &ApprovalCoordinator {
        &self.coordinator
    }

    /// Terminal success report from the Sentinel; the trust pair keys on the
    /// focus at completion time.
    pub fn report_completed(&self, proposal_id: &str) -> Result<(), DaemonError> {
        let window = self.focus.window_title();
        self.coordinator.complete(proposal_id, &window)
    }

    /// Terminal failure report from the Sentinel.
    pub fn report_failed(&self, proposal_id: &str) -> Result<(), DaemonError> {
        self.coordinator.fail(proposal_id)
    }

    /// Approved-or-executing proposals, for polling effectors.
    pub fn approved_proposals(&self) -> Result<Vec<ProposalRecord>, DaemonError> {
        self.proposals.approved()
    }

    /// The action-out dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<ActionDispatcher> {
        self.dispatcher.clone()
    }

    /// The event bus.
    #[must_use]
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Publishes a streaming session update event.
    pub fn publish_session_update(
        &self,
        session_id: &str,
        message_id: &str,
        delta: &str,
        is_complete: bool,
        role: &str,
    ) {
        publish(
            &self.events,
            KernelEvent::SessionUpdate {
                session_id: session_id.to_string(),
                message_id: message_id.to_string(),
                delta: delta.to_string(),
                is_complete,
                role: role.to_string(),
                timestamp: chrono::Utc::now(),
            },
        );
    }

    /// The legacy command queue.
    #[must_use]
    pub const fn commands(&self) -> &CommandRepository {
        &self.commands
    }

    /// The memory store.
    #[must_use]
    pub const fn artifacts(&self) -> &ArtifactRepository {
        &self.artifacts
    }

    /// The current focus snapshot.
    #[must_use]
    pub fn focus_snapshot(&self) -> warden_core::FocusSnapshot {
        self.focus.snapshot()
    }
}
