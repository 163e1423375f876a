//! Persistence round-trips: the kernel forgets nothing across a restart.

use std::sync::Arc;

use tempfile::TempDir;
use warden_core::{KernelConfig, ProposalStatus, SystemMode};
use warden_daemon::storage;
use warden_daemon::KernelService;

fn kernel_at(dir: &TempDir) -> Arc<KernelService> {
    let conn = storage::open_database(&dir.path().join("kernel.db")).unwrap();
    KernelService::new(conn, &KernelConfig::default()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_queue_survives_reopen() {
    let dir = TempDir::new().unwrap();

    let before = {
        let service = kernel_at(&dir);
        service.set_system_mode(SystemMode::Active).unwrap();
        service
            .propose("file taxes", 80, serde_json::json!([{"type": "CLICK"}]), "finance")
            .unwrap();
        service
            .request_clarification("book flight", "from which airport?", "")
            .unwrap();
        service.coordinator().list_pending().unwrap()
    };
    assert_eq!(before.len(), 2);

    // A fresh kernel over the same file sees the same queue.
    let service = kernel_at(&dir);
    let after = service.coordinator().list_pending().unwrap();
    assert_eq!(after.len(), before.len());
    for (a, b) in after.iter().zip(&before) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.intent, b.intent);
        assert_eq!(a.status, b.status);
        assert_eq!(a.risk_score, b.risk_score);
    }

    // And the system mode came back too.
    let (mode, _) = service.system_state();
    assert_eq!(mode, SystemMode::Active);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn approval_then_completion_raises_trust() {
    let dir = TempDir::new().unwrap();
    let service = kernel_at(&dir);
    service.set_system_mode(SystemMode::Active).unwrap();
    service.report_focus("Spreadsheet", "calc");

    let (record, _) = service
        .propose(
            "update ledger",
            60,
            serde_json::json!([{"type": "TYPE", "payload": {"text": "42"}}]),
            "*",
        )
        .unwrap();
    assert_eq!(record.status, ProposalStatus::WaitingForUser);

    let before = service.trust_score("update ledger", "Spreadsheet").unwrap();
    service.coordinator().decide(&record.id, true).unwrap();
    // Approval alone moves nothing.
    assert_eq!(
        service.trust_score("update ledger", "Spreadsheet").unwrap(),
        before
    );

    service.report_completed(&record.id).unwrap();
    let after = service.trust_score("update ledger", "Spreadsheet").unwrap();
    assert!(after > before);
    assert_eq!(
        service.coordinator().get(&record.id).unwrap().status,
        ProposalStatus::Completed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reflexes_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let service = kernel_at(&dir);
        service.report_focus("Notes", "notes");
        for _ in 0..6 {
            let (record, _) = service
                .propose(
                    "compose morning report",
                    10,
                    serde_json::json!([{"type": "TYPE", "payload": {"text": "gm"}}]),
                    "*",
                )
                .unwrap();
            service.report_completed(&record.id).unwrap();
        }
    }

    let service = kernel_at(&dir);
    let (plan, trust) = service.reflex("compose morning report").unwrap().unwrap();
    assert_eq!(trust, 6);
    assert!(plan.contains("gm"));
}
