//! The binary RPC plane.
//!
//! Length-prefixed frames carrying tag-routed protobuf messages, one TCP
//! connection per client. The seven operations mirror the gateway's
//! semantics exactly — both planes are adaptors over the same
//! [`KernelService`]:
//!
//! | tag | operation             | shape                         |
//! |-----|-----------------------|-------------------------------|
//! | 1   | `ReportFocus`         | client-streamed `FocusState`  |
//! | 2   | `RequestPermission`   | unary                         |
//! | 3   | `StreamActions`       | server-streamed `ActionCommand` |
//! | 4   | `GetSystemState`      | unary                         |
//! | 5   | `GetPendingApprovals` | unary                         |
//! | 6   | `ApproveAction`       | unary                         |
//! | 7   | `SetSystemMode`       | unary                         |
//!
//! Responses reuse the request tag; tag 0 is the error envelope.

pub mod framing;
pub mod messages;

use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use prost::Message;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use warden_core::{AutomationMode, Proposal, SystemMode};

use crate::gateway::frames::{ERR_INTERNAL, ERR_INVALID_PARAMS, ERR_METHOD_NOT_FOUND};
use crate::service::KernelService;
use framing::FrameCodec;
use messages::{
    encode_tagged, Ack, ActionCommand, ApprovalDecision, FocusState, ModeRequest, PendingItem,
    PendingList, PermissionRequest, PermissionResponse, RpcError, RpcMethod, SystemState,
};

/// Protocol-level failure on the binary plane.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame length exceeds the cap.
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Claimed size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// Transport failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The binary RPC server.
pub struct RpcServer {
    service: Arc<KernelService>,
}

impl RpcServer {
    /// Builds the server.
    #[must_use]
    pub fn new(service: Arc<KernelService>) -> Arc<Self> {
        Arc::new(Self { service })
    }

    /// Accept loop. Runs until the listener errors or shutdown fires.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        tracing::info!(addr = ?listener.local_addr().ok(), "rpc plane listening");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "rpc connection accepted");
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream).await;
                            });
                        }
                        Err(error) => {
                            tracing::error!(%error, "rpc accept failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("rpc plane shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) {
        let mut framed = Framed::new(stream, FrameCodec::new());

        while let Some(frame) = framed.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(error) => {
                    tracing::warn!(%error, "rpc frame error, closing connection");
                    break;
                }
            };
            if frame.is_empty() {
                if send_error(&mut framed, ERR_INVALID_PARAMS, "empty frame")
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }

            let tag = frame[0];
            let payload = &frame[1..];
            let Some(method) = RpcMethod::from_tag(tag) else {
                if send_error(
                    &mut framed,
                    ERR_METHOD_NOT_FOUND,
                    format!("unknown message tag: {tag}"),
                )
                .await
                .is_err()
                {
                    break;
                }
                continue;
            };

            // StreamActions flips the connection into push mode and consumes
            // it; everything else is request/response.
            if method == RpcMethod::StreamActions {
                self.drain_actions(&mut framed).await;
                break;
            }

            let reply = self.handle_unary(method, payload);
            if framed.send(reply).await.is_err() {
                break;
            }
        }
    }

    /// Handles one request/response operation.
    fn handle_unary(&self, method: RpcMethod, payload: &[u8]) -> Bytes {
        match method {
            RpcMethod::ReportFocus => match FocusState::decode(payload) {
                Ok(focus) => {
                    self.service
                        .report_focus(&focus.window_title, &focus.process_name);
                    encode_tagged(method.tag(), &Ack { success: true })
                }
                Err(error) => encode_decode_error(&error),
            },
            RpcMethod::RequestPermission => match PermissionRequest::decode(payload) {
                Ok(request) => self.handle_permission(request),
                Err(error) => encode_decode_error(&error),
            },
            RpcMethod::GetSystemState => {
                let (mode, focus) = self.service.system_state();
                encode_tagged(
                    method.tag(),
                    &SystemState {
                        state: mode.as_str().to_string(),
                        active_focus: focus,
                    },
                )
            }
            RpcMethod::GetPendingApprovals => match self.service.coordinator().list_pending() {
                Ok(records) => {
                    let items = records
                        .into_iter()
                        .map(|record| PendingItem {
                            action_id: record.id,
                            intent: record.intent,
                            risk_score: u32::from(record.risk_score),
                            status: record.status.as_str().to_string(),
                            interaction_type: record.interaction_type.as_str().to_string(),
                            agent_message: record.agent_message.unwrap_or_default(),
                        })
                        .collect();
                    encode_tagged(method.tag(), &PendingList { items })
                }
                Err(error) => encode_error(ERR_INTERNAL, error.masked_reason()),
            },
            RpcMethod::ApproveAction => match ApprovalDecision::decode(payload) {
                Ok(decision) => {
                    match self
                        .service
                        .coordinator()
                        .decide(&decision.action_id, decision.approved)
                    {
                        Ok(_) => encode_tagged(method.tag(), &Ack { success: true }),
                        Err(error) => {
                            tracing::warn!(%error, action_id = %decision.action_id, "approve failed");
                            encode_error(ERR_INVALID_PARAMS, error.masked_reason())
                        }
                    }
                }
                Err(error) => encode_decode_error(&error),
            },
            RpcMethod::SetSystemMode => match ModeRequest::decode(payload) {
                Ok(request) => self.handle_mode_request(&request),
                Err(error) => encode_decode_error(&error),
            },
            RpcMethod::StreamActions => unreachable!("handled by the connection loop"),
        }
    }

    fn handle_permission(&self, request: PermissionRequest) -> Bytes {
        let mut proposal = Proposal::new(request.intent);
        if !request.trace_id.is_empty() {
            proposal.id.clone_from(&request.trace_id);
            proposal.trace_id = request.trace_id;
        }
        if !request.expected_window.is_empty() {
            proposal.expected_window = Some(request.expected_window);
        }
        proposal.override_risk = request.r#override;
        proposal.actions = request
            .actions
            .into_iter()
            .map(messages::ActionMessage::into_action)
            .collect();

        match self.service.request_permission(proposal) {
            Ok(outcome) => encode_tagged(
                RpcMethod::RequestPermission.tag(),
                &PermissionResponse {
                    approved: outcome.approved,
                    reason: outcome.reason.unwrap_or_default(),
                    trust_score: outcome.trust_score,
                    error_code: outcome.error_code.unwrap_or_default(),
                    status: outcome
                        .status
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_default(),
                },
            ),
            Err(error) => encode_error(ERR_INTERNAL, error.masked_reason()),
        }
    }

    fn handle_mode_request(&self, request: &ModeRequest) -> Bytes {
        if let Some(mode) = SystemMode::parse(&request.mode) {
            return match self.service.set_system_mode(mode) {
                Ok(()) => encode_tagged(RpcMethod::SetSystemMode.tag(), &Ack { success: true }),
                Err(error) => encode_error(ERR_INTERNAL, error.masked_reason()),
            };
        }
        if let Some(mode) = AutomationMode::parse(&request.mode) {
            let domain = if request.domain.is_empty() {
                "*"
            } else {
                &request.domain
            };
            return match self.service.set_user_mode(domain, mode) {
                Ok(()) => encode_tagged(RpcMethod::SetSystemMode.tag(), &Ack { success: true }),
                Err(error) => encode_error(ERR_INTERNAL, error.masked_reason()),
            };
        }
        encode_error(
            ERR_INVALID_PARAMS,
            format!("unknown mode: {}", request.mode),
        )
    }

    /// Push mode: drain the action buffer to this connection until it closes.
    /// The receiver guard makes this the stream's only consumer; a second
    /// subscriber waits here until the first disconnects.
    async fn drain_actions(&self, framed: &mut Framed<TcpStream, FrameCodec>) {
        tracing::info!("sentinel subscribed to the action stream");
        let dispatcher = self.service.dispatcher();
        let mut rx = dispatcher.subscribe().await;

        loop {
            tokio::select! {
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    let proto = ActionCommand {
                        command_id: command.command_id.clone(),
                        action: Some(messages::ActionMessage::from_action(&command.action)),
                    };
                    let frame = encode_tagged(RpcMethod::StreamActions.tag(), &proto);
                    if let Err(error) = framed.send(frame).await {
                        tracing::warn!(%error, command_id = %command.command_id, "action stream write failed");
                        break;
                    }
                    tracing::debug!(command_id = %command.command_id, "action streamed");
                }
                incoming = framed.next() => {
                    match incoming {
                        None | Some(Err(_)) => break,
                        // Frames sent mid-stream are ignored.
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
        tracing::info!("action stream subscriber disconnected");
    }
}

async fn send_error(
    framed: &mut Framed<TcpStream, FrameCodec>,
    code: i32,
    message: impl Into<String>,
) -> Result<(), ProtocolError> {
    framed.send(encode_error(code, message)).await
}

fn encode_error(code: i32, message: impl Into<String>) -> Bytes {
    encode_tagged(
        0,
        &RpcError {
            code,
            message: message.into(),
        },
    )
}

fn encode_decode_error(error: &prost::DecodeError) -> Bytes {
    encode_error(ERR_INVALID_PARAMS, format!("malformed payload: {error}"))
}
