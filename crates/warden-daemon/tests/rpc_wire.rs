//! Wire-level tests for the binary RPC plane.

use std::sync::Arc;

use prost::Message;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use warden_core::{KernelConfig, SystemMode};
use warden_daemon::rpc::messages::{
    Ack, ActionCommand, ActionMessage, ApprovalDecision, Empty, FocusState, ModeRequest,
    PendingList, PermissionRequest, PermissionResponse, RpcError, RpcMethod, SystemState,
};
use warden_daemon::rpc::RpcServer;
use warden_daemon::storage;
use warden_daemon::KernelService;

struct Harness {
    service: Arc<KernelService>,
    addr: std::net::SocketAddr,
    _dir: TempDir,
    _shutdown: tokio::sync::watch::Sender<bool>,
}

async fn start_rpc() -> Harness {
    let dir = TempDir::new().unwrap();
    let conn = storage::open_database(&dir.path().join("kernel.db")).unwrap();
    let service = KernelService::new(conn, &KernelConfig::default()).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(RpcServer::new(service.clone()).run(listener, shutdown_rx));

    Harness {
        service,
        addr,
        _dir: dir,
        _shutdown: shutdown_tx,
    }
}

async fn send_frame(stream: &mut TcpStream, tag: u8, message: &impl Message) {
    let mut payload = vec![tag];
    message.encode(&mut payload).unwrap();
    let len = u32::try_from(payload.len()).unwrap();
    stream.write_all(&len.to_be_bytes()).await.unwrap();
    stream.write_all(&payload).await.unwrap();
}

async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let len = u32::from_be_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    (payload[0], payload[1..].to_vec())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn permission_denial_comes_back_unary() {
    let harness = start_rpc().await;
    harness.service.set_system_mode(SystemMode::Active).unwrap();

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    let request = PermissionRequest {
        intent: "tidy".to_string(),
        actions: vec![ActionMessage {
            r#type: "WRITE".to_string(),
            payload: [("path".to_string(), "/etc/hosts".to_string())]
                .into_iter()
                .collect(),
            risk_level: 0,
        }],
        trace_id: "t-9".to_string(),
        expected_window: String::new(),
        r#override: true,
    };
    send_frame(&mut stream, RpcMethod::RequestPermission.tag(), &request).await;

    let (tag, payload) = read_frame(&mut stream).await;
    assert_eq!(tag, RpcMethod::RequestPermission.tag());
    let response = PermissionResponse::decode(payload.as_slice()).unwrap();
    assert!(!response.approved);
    assert!(response.reason.contains("unsafe path"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn focus_reports_feed_system_state() {
    let harness = start_rpc().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    send_frame(
        &mut stream,
        RpcMethod::ReportFocus.tag(),
        &FocusState {
            window_title: "Notes — draft.md".to_string(),
            process_name: "notes".to_string(),
        },
    )
    .await;
    let (tag, payload) = read_frame(&mut stream).await;
    assert_eq!(tag, RpcMethod::ReportFocus.tag());
    assert!(Ack::decode(payload.as_slice()).unwrap().success);

    send_frame(&mut stream, RpcMethod::GetSystemState.tag(), &Empty {}).await;
    let (tag, payload) = read_frame(&mut stream).await;
    assert_eq!(tag, RpcMethod::GetSystemState.tag());
    let state = SystemState::decode(payload.as_slice()).unwrap();
    assert_eq!(state.state, "SHADOW");
    assert_eq!(state.active_focus, "Notes — draft.md");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_queue_and_decisions_over_the_wire() {
    let harness = start_rpc().await;
    harness.service.set_system_mode(SystemMode::Active).unwrap();
    let (record, _) = harness
        .service
        .propose("file taxes", 90, serde_json::json!([{"type": "CLICK"}]), "*")
        .unwrap();

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    send_frame(&mut stream, RpcMethod::GetPendingApprovals.tag(), &Empty {}).await;
    let (tag, payload) = read_frame(&mut stream).await;
    assert_eq!(tag, RpcMethod::GetPendingApprovals.tag());
    let pending = PendingList::decode(payload.as_slice()).unwrap();
    assert_eq!(pending.items.len(), 1);
    assert_eq!(pending.items[0].action_id, record.id);
    assert_eq!(pending.items[0].risk_score, 90);

    send_frame(
        &mut stream,
        RpcMethod::ApproveAction.tag(),
        &ApprovalDecision {
            action_id: record.id.clone(),
            approved: true,
        },
    )
    .await;
    let (tag, payload) = read_frame(&mut stream).await;
    assert_eq!(tag, RpcMethod::ApproveAction.tag());
    assert!(Ack::decode(payload.as_slice()).unwrap().success);

    // Deciding an unknown proposal is an error envelope, not a crash.
    send_frame(
        &mut stream,
        RpcMethod::ApproveAction.tag(),
        &ApprovalDecision {
            action_id: "missing".to_string(),
            approved: true,
        },
    )
    .await;
    let (tag, payload) = read_frame(&mut stream).await;
    assert_eq!(tag, 0);
    let error = RpcError::decode(payload.as_slice()).unwrap();
    assert_eq!(error.code, -32602);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_actions_delivers_approved_plans() {
    let harness = start_rpc().await;
    harness.service.set_system_mode(SystemMode::Active).unwrap();

    // Subscribe the "Sentinel" first.
    let mut sentinel = TcpStream::connect(harness.addr).await.unwrap();
    send_frame(&mut sentinel, RpcMethod::StreamActions.tag(), &Empty {}).await;

    // A low-risk plan auto-approves and flows down the stream.
    let mut planner = TcpStream::connect(harness.addr).await.unwrap();
    let request = PermissionRequest {
        intent: "press enter".to_string(),
        actions: vec![ActionMessage {
            r#type: "KEY".to_string(),
            payload: [("key".to_string(), "Enter".to_string())]
                .into_iter()
                .collect(),
            risk_level: 0,
        }],
        trace_id: "t-42".to_string(),
        expected_window: String::new(),
        r#override: false,
    };
    send_frame(&mut planner, RpcMethod::RequestPermission.tag(), &request).await;
    let (_, payload) = read_frame(&mut planner).await;
    assert!(PermissionResponse::decode(payload.as_slice()).unwrap().approved);

    let (tag, payload) = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        read_frame(&mut sentinel),
    )
    .await
    .expect("an action command should arrive");
    assert_eq!(tag, RpcMethod::StreamActions.tag());
    let command = ActionCommand::decode(payload.as_slice()).unwrap();
    assert_eq!(command.command_id, "t-42-0");
    assert_eq!(command.action.unwrap().r#type, "KEY");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mode_request_switches_system_and_automation_modes() {
    let harness = start_rpc().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    send_frame(
        &mut stream,
        RpcMethod::SetSystemMode.tag(),
        &ModeRequest {
            domain: String::new(),
            mode: "ACTIVE".to_string(),
        },
    )
    .await;
    let (tag, _) = read_frame(&mut stream).await;
    assert_eq!(tag, RpcMethod::SetSystemMode.tag());
    assert_eq!(harness.service.system_state().0, SystemMode::Active);

    send_frame(
        &mut stream,
        RpcMethod::SetSystemMode.tag(),
        &ModeRequest {
            domain: "mail".to_string(),
            mode: "MANUAL".to_string(),
        },
    )
    .await;
    let (tag, _) = read_frame(&mut stream).await;
    assert_eq!(tag, RpcMethod::SetSystemMode.tag());
    assert_eq!(
        harness.service.user_mode("mail").unwrap(),
        warden_core::AutomationMode::Manual
    );

    // Garbage modes are refused.
    send_frame(
        &mut stream,
        RpcMethod::SetSystemMode.tag(),
        &ModeRequest {
            domain: String::new(),
            mode: "TURBO".to_string(),
        },
    )
    .await;
    let (tag, payload) = read_frame(&mut stream).await;
    assert_eq!(tag, 0);
    assert_eq!(RpcError::decode(payload.as_slice()).unwrap().code, -32602);
}
