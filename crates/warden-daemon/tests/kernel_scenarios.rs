//! End-to-end scenarios through the assembled kernel: validation, holds,
//! overrides, reflexes, clarifications, and the paused mode.

use std::sync::Arc;

use tempfile::TempDir;
use warden_core::{Action, KernelConfig, Proposal, ProposalStatus, RiskLevel, SystemMode};
use warden_daemon::storage;
use warden_daemon::KernelService;

fn kernel(dir: &TempDir) -> Arc<KernelService> {
    let conn = storage::open_database(&dir.path().join("kernel.db")).unwrap();
    KernelService::new(conn, &KernelConfig::default()).unwrap()
}

fn write_draft(override_risk: bool) -> Proposal {
    let mut proposal = Proposal::new("save draft").with_action(
        Action::new("WRITE")
            .with("path", "data/draft.md")
            .with("content", "hi"),
    );
    proposal.override_risk = override_risk;
    proposal
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_to_safe_path_needs_override_to_flow() {
    let dir = TempDir::new().unwrap();
    let service = kernel(&dir);
    service.set_system_mode(SystemMode::Active).unwrap();
    service.report_focus("Notes — draft.md", "notes");

    // Without the override flag the plan is valid but parked.
    let outcome = service.request_permission(write_draft(false)).unwrap();
    assert!(!outcome.approved);
    assert!(outcome.held);
    assert_eq!(outcome.status, Some(ProposalStatus::WaitingForUser));
    assert_eq!(outcome.risk_level, RiskLevel::High);
    assert!(outcome
        .reason
        .as_deref()
        .unwrap()
        .contains("requires explicit override"));

    let entry = service.audit_recent(1).pop().unwrap();
    assert_eq!(entry.risk_level, RiskLevel::High);
    assert!(!entry.blocked);

    // Nothing reached the stream while parked.
    {
        let dispatcher = service.dispatcher();
        let mut rx = dispatcher.subscribe().await;
        assert!(rx.try_recv().is_err());
    }

    // With the override flag it flows straight to the Sentinel.
    let outcome = service.request_permission(write_draft(true)).unwrap();
    assert!(outcome.approved);
    assert_eq!(outcome.status, Some(ProposalStatus::Executing));

    let dispatcher = service.dispatcher();
    let mut rx = dispatcher.subscribe().await;
    let command = rx.recv().await.unwrap();
    assert_eq!(command.action.action_type, "WRITE");
    assert_eq!(command.command_id, format!("{}-0", outcome.request_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_to_absolute_path_is_blocked_with_no_command() {
    let dir = TempDir::new().unwrap();
    let service = kernel(&dir);
    service.set_system_mode(SystemMode::Active).unwrap();

    let mut proposal = Proposal::new("save draft").with_action(
        Action::new("WRITE")
            .with("path", "/etc/passwd")
            .with("content", "hi"),
    );
    proposal.override_risk = true;

    let outcome = service.request_permission(proposal).unwrap();
    assert!(!outcome.approved);
    assert!(outcome.reason.as_deref().unwrap().contains("unsafe path"));
    assert_eq!(outcome.risk_level, RiskLevel::Critical);

    let entry = service.audit_recent(1).pop().unwrap();
    assert!(entry.blocked);
    assert_eq!(entry.risk_level, RiskLevel::Critical);

    let dispatcher = service.dispatcher();
    let mut rx = dispatcher.subscribe().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn focus_mismatch_is_denied_with_code() {
    let dir = TempDir::new().unwrap();
    let service = kernel(&dir);
    service.set_system_mode(SystemMode::Active).unwrap();
    service.report_focus("Terminal", "zsh");

    let mut proposal = Proposal::new("compose email").with_action(Action::new("CLICK"));
    proposal.expected_window = Some("Gmail".to_string());

    let outcome = service.request_permission(proposal).unwrap();
    assert!(!outcome.approved);
    assert_eq!(outcome.error_code.as_deref(), Some("FOCUS_MISMATCH"));
    assert!(service.audit_recent(1).pop().unwrap().blocked);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reflex_appears_after_six_completed_runs() {
    let dir = TempDir::new().unwrap();
    let service = kernel(&dir);
    service.set_system_mode(SystemMode::Active).unwrap();
    service.report_focus("Notes", "notes");

    for _ in 0..6 {
        let proposal = Proposal::new("compose morning report")
            .with_action(Action::new("TYPE").with("text", "good morning"));
        let outcome = service.request_permission(proposal).unwrap();
        assert!(outcome.approved);
        service.report_completed(&outcome.request_id).unwrap();
    }

    assert_eq!(service.trust_score("compose morning report", "Notes").unwrap(), 6);
    let (plan, trust) = service.reflex("compose morning report").unwrap().unwrap();
    assert_eq!(trust, 6);
    assert!(plan.contains("good morning"));

    // The planner reports the cached plan failed; the reflex goes away.
    service.invalidate_reflex("compose morning report").unwrap();
    assert!(service.reflex("compose morning report").unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clarification_waits_for_context_then_resumes() {
    let dir = TempDir::new().unwrap();
    let service = kernel(&dir);

    let record = service
        .request_clarification("book flight", "from which airport?", "")
        .unwrap();
    assert_eq!(record.status, ProposalStatus::WaitingForContext);

    let pending = service.coordinator().list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].agent_message.as_deref(), Some("from which airport?"));

    let replied = service.coordinator().reply(&record.id, "JFK").unwrap();
    assert_eq!(replied.status, ProposalStatus::Pending);

    let polled = service.coordinator().get(&record.id).unwrap();
    assert_eq!(polled.user_response.as_deref(), Some("JFK"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn paused_system_denies_and_leaves_trust_alone() {
    let dir = TempDir::new().unwrap();
    let service = kernel(&dir);
    service.set_system_mode(SystemMode::Paused).unwrap();
    service.report_focus("Notes", "notes");

    let outcome = service
        .request_permission(Proposal::new("anything").with_action(Action::new("WAIT")))
        .unwrap();
    assert!(!outcome.approved);
    assert_eq!(outcome.reason.as_deref(), Some("paused"));
    assert!(service.audit_recent(1).pop().unwrap().blocked);
    assert_eq!(service.trust_score("anything", "Notes").unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn speak_payload_passes_where_type_is_blocked() {
    let dir = TempDir::new().unwrap();
    let service = kernel(&dir);
    service.set_system_mode(SystemMode::Active).unwrap();

    let spoken = Proposal::new("answer the user")
        .with_action(Action::new("SPEAK").with("text", "I will delete the old draft"));
    assert!(service.request_permission(spoken).unwrap().approved);

    let typed = Proposal::new("answer the user")
        .with_action(Action::new("TYPE").with("text", "I will delete the old draft"));
    let outcome = service.request_permission(typed).unwrap();
    assert!(!outcome.approved);
    assert!(outcome.reason.as_deref().unwrap().contains("'delete'"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_action_list_auto_approves_in_auto_mode() {
    let dir = TempDir::new().unwrap();
    let service = kernel(&dir);
    service.set_system_mode(SystemMode::Active).unwrap();

    let outcome = service.request_permission(Proposal::new("plan ahead")).unwrap();
    assert!(outcome.approved);
    assert_eq!(outcome.risk_level, RiskLevel::None);
    assert!(!service.audit_recent(1).pop().unwrap().blocked);
}
