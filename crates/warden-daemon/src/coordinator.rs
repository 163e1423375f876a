//! The approval coordinator: proposals that need a human, and what happens
//! to them afterwards.
//!
//! All coordinator state is persisted; the component survives restarts with
//! nothing but cache warm-up. Both transports (and the HTTP queue) drive the
//! same methods here — there is exactly one approval pipeline.
//!
//! Lifecycle responsibilities:
//!
//! - `submit` / `submit_clarification` decide auto-resolve vs hold. A
//!   proposal is either auto-resolved or enqueued, never both.
//! - `decide` applies the user's yes/no and hands approved plans to the
//!   action stream (only while the system is ACTIVE).
//! - `reply` completes a clarification and reactivates the proposal.
//! - `complete` / `fail` apply the Sentinel's terminal report; only
//!   `complete` touches the trust store.

use std::sync::Arc;

use chrono::Utc;
use warden_core::{Action, AutomationMode, ProposalRecord, ProposalStatus, SystemMode};

use crate::dispatch::ActionDispatcher;
use crate::error::DaemonError;
use crate::events::{publish, EventBus, KernelEvent};
use crate::storage::{IntentHistoryRepository, ProposalRepository, StateRepository};

/// Outcome of submitting a proposal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Auto-approved and (when ACTIVE) streaming to the Sentinel.
    AutoApproved,
    /// Held for the user.
    Held,
    /// Denied because the system is paused.
    Rejected,
}

/// Coordinates pending approvals across transports.
pub struct ApprovalCoordinator {
    proposals: ProposalRepository,
    history: IntentHistoryRepository,
    dispatcher: Arc<ActionDispatcher>,
    state: Arc<StateRepository>,
    events: EventBus,
}

impl ApprovalCoordinator {
    /// Wires the coordinator to its collaborators.
    #[must_use]
    pub fn new(
        proposals: ProposalRepository,
        history: IntentHistoryRepository,
        dispatcher: Arc<ActionDispatcher>,
        state: Arc<StateRepository>,
        events: EventBus,
    ) -> Self {
        Self {
            proposals,
            history,
            dispatcher,
            state,
            events,
        }
    }

    /// Submits a permission-type record: auto-resolve under AUTO below the
    /// risk ceiling (or with an explicit override), hold otherwise. Paused
    /// systems reject outright.
    pub fn submit(
        &self,
        mut record: ProposalRecord,
        mode: AutomationMode,
        override_risk: bool,
    ) -> Result<(ProposalRecord, SubmitOutcome), DaemonError> {
        let system_mode = self.state.get();

        if system_mode == SystemMode::Paused {
            record.status = ProposalStatus::Rejected;
            self.proposals.save(&record)?;
            tracing::warn!(id = %record.id, intent = %record.intent, "proposal rejected: paused");
            return Ok((record, SubmitOutcome::Rejected));
        }

        // The override flag is the planner's explicit grant for high-risk
        // plans; under AUTO it substitutes for the risk ceiling. MANUAL
        // always holds.
        let auto_approve = record.should_auto_approve(mode)
            || (mode == AutomationMode::Auto && override_risk);

        if auto_approve {
            // Forwarding requires full agency; in SHADOW the approval is
            // recorded but nothing reaches the Sentinel.
            if system_mode == SystemMode::Active {
                record.status = ProposalStatus::Executing;
                self.proposals.save(&record)?;
                self.stream_plan(&record);
            } else {
                record.status = ProposalStatus::Approved;
                record.approved_at = Some(Utc::now());
                self.proposals.save(&record)?;
            }
            tracing::info!(
                id = %record.id,
                intent = %record.intent,
                risk = record.risk_score,
                system_mode = %system_mode,
                "proposal auto-approved"
            );
            return Ok((record, SubmitOutcome::AutoApproved));
        }

        record.status = ProposalStatus::WaitingForUser;
        self.proposals.save(&record)?;
        publish(
            &self.events,
            KernelEvent::ApprovalPending {
                request_id: record.id.clone(),
                intent: record.intent.clone(),
                risk_score: record.risk_score,
                timestamp: Utc::now(),
            },
        );
        tracing::info!(id = %record.id, intent = %record.intent, risk = record.risk_score, "proposal held for user");
        Ok((record, SubmitOutcome::Held))
    }

    /// Stores a clarification request, held for context from the start.
    pub fn submit_clarification(
        &self,
        record: ProposalRecord,
    ) -> Result<ProposalRecord, DaemonError> {
        self.proposals.save(&record)?;
        publish(
            &self.events,
            KernelEvent::ApprovalPending {
                request_id: record.id.clone(),
                intent: record.intent.clone(),
                risk_score: 0,
                timestamp: Utc::now(),
            },
        );
        tracing::info!(id = %record.id, intent = %record.intent, "clarification requested");
        Ok(record)
    }

    /// Everything awaiting the user, oldest first.
    pub fn list_pending(&self) -> Result<Vec<ProposalRecord>, DaemonError> {
        self.proposals.pending()
    }

    /// Latest state of one proposal, for polling.
    pub fn get(&self, id: &str) -> Result<ProposalRecord, DaemonError> {
        self.proposals.get(id)
    }

    /// Applies the user's yes/no to a held proposal. Approved plans go to
    /// the action stream while the system is ACTIVE.
    pub fn decide(&self, id: &str, approved: bool) -> Result<ProposalRecord, DaemonError> {
        let record = self.proposals.get(id)?;
        if record.status != ProposalStatus::WaitingForUser {
            return Err(DaemonError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to: if approved {
                    ProposalStatus::Approved
                } else {
                    ProposalStatus::Rejected
                },
            });
        }

        if !approved {
            self.proposals.update_status(id, ProposalStatus::Rejected)?;
            tracing::info!(id, "proposal rejected by user");
            return self.proposals.get(id);
        }

        self.proposals.update_status(id, ProposalStatus::Approved)?;
        tracing::info!(id, "proposal approved by user");

        if self.state.get() == SystemMode::Active {
            let approved_record = self.proposals.get(id)?;
            self.stream_plan(&approved_record);
            self.proposals.update_status(id, ProposalStatus::Executing)?;
        }
        self.proposals.get(id)
    }

    /// Stores the user's free-text reply to a clarification and reactivates
    /// the proposal so the planner can resume.
    pub fn reply(&self, id: &str, message: &str) -> Result<ProposalRecord, DaemonError> {
        let record = self.proposals.get(id)?;
        if record.status != ProposalStatus::WaitingForContext {
            return Err(DaemonError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to: ProposalStatus::Pending,
            });
        }
        self.proposals.update_user_response(id, message)?;
        self.proposals.update_status(id, ProposalStatus::Pending)?;
        tracing::info!(id, "clarification answered");
        self.proposals.get(id)
    }

    /// Marks a proposal executing (the Sentinel picked it up).
    pub fn mark_executing(&self, id: &str) -> Result<(), DaemonError> {
        self.proposals.update_status(id, ProposalStatus::Executing)
    }

    /// Terminal success: the one place trust counts move. The focused window
    /// at completion time keys the trust pair; the serialised plan becomes
    /// the reflex candidate.
    pub fn complete(&self, id: &str, focused_window: &str) -> Result<(), DaemonError> {
        let record = self.proposals.get(id)?;
        self.proposals.update_status(id, ProposalStatus::Completed)?;
        let plan = record.payload.to_string();
        self.history
            .record_success(&record.intent, focused_window, &plan)?;
        tracing::info!(id, intent = %record.intent, "proposal completed, trust recorded");
        Ok(())
    }

    /// Terminal failure. Trust is untouched.
    pub fn fail(&self, id: &str) -> Result<(), DaemonError> {
        self.proposals.update_status(id, ProposalStatus::Failed)?;
        tracing::warn!(id, "proposal failed");
        Ok(())
    }

    /// Decomposes a record's payload into per-action commands on the stream.
    /// Payloads that are not action lists stay available to polling clients.
    fn stream_plan(&self, record: &ProposalRecord) {
        match serde_json::from_value::<Vec<Action>>(record.payload.clone()) {
            Ok(actions) if !actions.is_empty() => {
                let accepted = self.dispatcher.enqueue_actions(&record.id, &actions);
                tracing::info!(
                    id = %record.id,
                    enqueued = accepted,
                    total = actions.len(),
                    "plan streamed to action buffer"
                );
            }
            Ok(_) => {}
            Err(_) => {
                tracing::debug!(id = %record.id, "payload is not an action list, left to polling");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_bus;
    use crate::storage::open_in_memory;

    fn coordinator() -> (ApprovalCoordinator, Arc<ActionDispatcher>, Arc<StateRepository>) {
        let conn = open_in_memory().unwrap();
        let dispatcher = Arc::new(ActionDispatcher::new());
        let state = Arc::new(StateRepository::new(conn.clone()).unwrap());
        let coordinator = ApprovalCoordinator::new(
            ProposalRepository::new(conn.clone()),
            IntentHistoryRepository::new(conn),
            dispatcher.clone(),
            state.clone(),
            event_bus(),
        );
        (coordinator, dispatcher, state)
    }

    fn actions_payload() -> serde_json::Value {
        serde_json::json!([
            {"type": "CLICK", "payload": {"target": "compose"}},
            {"type": "TYPE", "payload": {"text": "hello"}}
        ])
    }

    #[tokio::test]
    async fn auto_approval_streams_when_active() {
        let (coordinator, dispatcher, state) = coordinator();
        state.set(SystemMode::Active).unwrap();

        let record = ProposalRecord::new_permission("say hi", 10, actions_payload(), "*");
        let (record, outcome) = coordinator.submit(record, AutomationMode::Auto, false).unwrap();
        assert_eq!(outcome, SubmitOutcome::AutoApproved);
        assert_eq!(record.status, ProposalStatus::Executing);

        let mut rx = dispatcher.subscribe().await;
        let first = rx.recv().await.unwrap();
        assert_eq!(first.command_id, format!("{}-0", record.id));
        assert_eq!(first.action.action_type, "CLICK");
    }

    #[tokio::test]
    async fn shadow_never_forwards() {
        let (coordinator, dispatcher, _state) = coordinator();
        // Default mode is SHADOW.
        let record = ProposalRecord::new_permission("say hi", 10, actions_payload(), "*");
        let (record, outcome) = coordinator.submit(record, AutomationMode::Auto, false).unwrap();
        assert_eq!(outcome, SubmitOutcome::AutoApproved);
        assert_eq!(record.status, ProposalStatus::Approved);

        let mut rx = dispatcher.subscribe().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn paused_rejects_submissions() {
        let (coordinator, _dispatcher, state) = coordinator();
        state.set(SystemMode::Paused).unwrap();
        let record = ProposalRecord::new_permission("anything", 1, actions_payload(), "*");
        let (record, outcome) = coordinator.submit(record, AutomationMode::Auto, false).unwrap();
        assert_eq!(outcome, SubmitOutcome::Rejected);
        assert_eq!(record.status, ProposalStatus::Rejected);
    }

    #[tokio::test]
    async fn high_risk_or_manual_is_held() {
        let (coordinator, _dispatcher, state) = coordinator();
        state.set(SystemMode::Active).unwrap();

        let record = ProposalRecord::new_permission("risky", 70, actions_payload(), "*");
        let (_, outcome) = coordinator.submit(record, AutomationMode::Auto, false).unwrap();
        assert_eq!(outcome, SubmitOutcome::Held);

        let record = ProposalRecord::new_permission("tame", 5, actions_payload(), "*");
        let (_, outcome) = coordinator.submit(record, AutomationMode::Manual, false).unwrap();
        assert_eq!(outcome, SubmitOutcome::Held);
    }

    #[tokio::test]
    async fn decide_approves_and_streams() {
        let (coordinator, dispatcher, state) = coordinator();
        state.set(SystemMode::Active).unwrap();

        let record = ProposalRecord::new_permission("risky", 70, actions_payload(), "*");
        let (record, _) = coordinator.submit(record, AutomationMode::Auto, false).unwrap();

        let decided = coordinator.decide(&record.id, true).unwrap();
        assert_eq!(decided.status, ProposalStatus::Executing);
        assert!(decided.approved_at.is_some());

        let mut rx = dispatcher.subscribe().await;
        assert_eq!(rx.recv().await.unwrap().proposal_id, record.id);
    }

    #[tokio::test]
    async fn decide_rejection_never_streams() {
        let (coordinator, dispatcher, state) = coordinator();
        state.set(SystemMode::Active).unwrap();

        let record = ProposalRecord::new_permission("risky", 70, actions_payload(), "*");
        let (record, _) = coordinator.submit(record, AutomationMode::Auto, false).unwrap();

        let decided = coordinator.decide(&record.id, false).unwrap();
        assert_eq!(decided.status, ProposalStatus::Rejected);

        let mut rx = dispatcher.subscribe().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn decide_requires_waiting_for_user() {
        let (coordinator, _dispatcher, state) = coordinator();
        state.set(SystemMode::Active).unwrap();
        let record = ProposalRecord::new_permission("tame", 1, actions_payload(), "*");
        let (record, _) = coordinator.submit(record, AutomationMode::Auto, false).unwrap();
        assert!(matches!(
            coordinator.decide(&record.id, true),
            Err(DaemonError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn clarification_loop_reactivates() {
        let (coordinator, _dispatcher, _state) = coordinator();
        let record = ProposalRecord::new_clarification(
            "book flight",
            "from which airport?",
            serde_json::json!({}),
            "*",
        );
        let record = coordinator.submit_clarification(record).unwrap();

        let pending = coordinator.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, ProposalStatus::WaitingForContext);

        let replied = coordinator.reply(&record.id, "JFK").unwrap();
        assert_eq!(replied.status, ProposalStatus::Pending);
        assert_eq!(replied.user_response.as_deref(), Some("JFK"));

        // Answered clarifications leave the pending queue.
        assert!(coordinator.list_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_feeds_trust_and_failure_does_not() {
        let (coordinator, _dispatcher, state) = coordinator();
        state.set(SystemMode::Active).unwrap();
        let history = &coordinator.history;

        let record = ProposalRecord::new_permission("report", 70, actions_payload(), "*");
        let (record, _) = coordinator.submit(record, AutomationMode::Auto, false).unwrap();
        coordinator.decide(&record.id, true).unwrap();

        assert_eq!(history.trust_score("report", "Notes").unwrap(), 0);
        coordinator.complete(&record.id, "Notes").unwrap();
        assert_eq!(history.trust_score("report", "Notes").unwrap(), 1);
        assert_eq!(
            coordinator.get(&record.id).unwrap().status,
            ProposalStatus::Completed
        );

        let record2 = ProposalRecord::new_permission("report", 70, actions_payload(), "*");
        let (record2, _) = coordinator.submit(record2, AutomationMode::Auto, false).unwrap();
        coordinator.decide(&record2.id, true).unwrap();
        coordinator.fail(&record2.id).unwrap();
        assert_eq!(history.trust_score("report", "Notes").unwrap(), 1);
    }
}
