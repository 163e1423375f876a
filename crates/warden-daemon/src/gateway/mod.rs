//! The message-framed control plane: JSON-RPC 2.0 frames over one persistent
//! TCP connection per client.
//!
//! Connection lifecycle:
//!
//! 1. The client's first call must be `connect` with the shared token; a
//!    failed match closes the connection.
//! 2. Post-auth, the client's type fixes its capability set; methods outside
//!    it are refused with `PERMISSION_DENIED`.
//! 3. Authenticated clients receive broadcast events (`focus.changed`,
//!    `approval.pending`, `session.update`, `tick`) interleaved with their
//!    responses. Event delivery is best-effort; a failed write logs and the
//!    connection moves on.
//!
//! Malformed frames get a parse-error reply and the connection survives;
//! oversized frames close it.

pub mod frames;
mod handlers;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::events::KernelEvent;
use crate::service::KernelService;
use crate::token::AuthToken;
use frames::{ClientType, ErrorShape, EventFrame, RequestFrame, ResponseFrame, ERR_PARSE};

/// Upper bound on a single frame line.
pub const MAX_FRAME_LEN: usize = 256 * 1024;

/// One authenticated client in the registry.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    /// Client species.
    pub client_type: ClientType,
    /// Connection time.
    pub connected_at: DateTime<Utc>,
}

/// Shared view of who is connected, for `registry.snapshot`.
pub type ClientRegistry = Arc<RwLock<HashMap<String, RegisteredClient>>>;

/// Per-connection authentication state.
#[derive(Debug, Clone)]
pub(crate) struct ClientSession {
    pub session_id: String,
    pub authenticated: bool,
    pub client_type: ClientType,
}

impl ClientSession {
    fn unauthenticated() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            authenticated: false,
            client_type: ClientType::External,
        }
    }
}

/// What the dispatcher wants done with the connection after a frame.
pub(crate) enum Outcome {
    /// Send the response, keep the connection.
    Reply(ResponseFrame),
    /// Send the response, then close.
    ReplyAndClose(ResponseFrame),
}

/// The gateway server.
pub struct GatewayServer {
    service: Arc<KernelService>,
    token: AuthToken,
    registry: ClientRegistry,
}

impl GatewayServer {
    /// Builds the server.
    #[must_use]
    pub fn new(service: Arc<KernelService>, token: AuthToken) -> Arc<Self> {
        Arc::new(Self {
            service,
            token,
            registry: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// The client registry.
    #[must_use]
    pub fn registry(&self) -> ClientRegistry {
        self.registry.clone()
    }

    /// Accept loop. Runs until the listener errors or shutdown fires.
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        tracing::info!(addr = ?listener.local_addr().ok(), "gateway listening");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "gateway connection accepted");
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream).await;
                            });
                        }
                        Err(error) => {
                            tracing::error!(%error, "gateway accept failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("gateway shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One connection: frames in, responses and events out.
    async fn handle_connection(&self, stream: TcpStream) {
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
        let mut events = self.service.events().subscribe();
        let mut session = ClientSession::unauthenticated();

        loop {
            tokio::select! {
                incoming = framed.next() => {
                    match incoming {
                        None => break,
                        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                            let reply = ResponseFrame::fail(
                                None,
                                ErrorShape::new(ERR_PARSE, "frame too large"),
                            );
                            let _ = send_json(&mut framed, &reply).await;
                            break;
                        }
                        Some(Err(LinesCodecError::Io(error))) => {
                            tracing::debug!(%error, "gateway read error");
                            break;
                        }
                        Some(Ok(line)) => {
                            let line = line.trim().to_string();
                            if line.is_empty() {
                                continue;
                            }
                            let outcome = self.handle_line(&line, &mut session);
                            match outcome {
                                Outcome::Reply(reply) => {
                                    if send_json(&mut framed, &reply).await.is_err() {
                                        break;
                                    }
                                }
                                Outcome::ReplyAndClose(reply) => {
                                    let _ = send_json(&mut framed, &reply).await;
                                    break;
                                }
                            }
                        }
                    }
                }
                event = events.recv(), if session.authenticated => {
                    match event {
                        Ok(event) => {
                            if let Err(error) = send_event(&mut framed, &event).await {
                                tracing::warn!(
                                    session_id = %session.session_id,
                                    %error,
                                    "event delivery failed"
                                );
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                session_id = %session.session_id,
                                skipped,
                                "client lagged, events skipped"
                            );
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        if session.authenticated {
            if let Ok(mut registry) = self.registry.write() {
                registry.remove(&session.session_id);
            }
            tracing::info!(
                session_id = %session.session_id,
                client_type = session.client_type.as_str(),
                "client disconnected"
            );
        }
    }

    /// Parses and dispatches one frame.
    fn handle_line(&self, line: &str, session: &mut ClientSession) -> Outcome {
        let frame: RequestFrame = match serde_json::from_str(line) {
            Ok(frame) => frame,
            Err(_) => {
                return Outcome::Reply(ResponseFrame::fail(
                    None,
                    ErrorShape::new(ERR_PARSE, "invalid JSON"),
                ));
            }
        };

        if frame.jsonrpc != frames::JSONRPC_VERSION {
            return Outcome::Reply(ResponseFrame::fail(
                frame.id,
                ErrorShape::new(frames::ERR_INVALID_REQUEST, "invalid JSON-RPC version"),
            ));
        }

        handlers::dispatch(&self.service, &self.token, &self.registry, session, frame)
    }
}

async fn send_json(
    framed: &mut Framed<TcpStream, LinesCodec>,
    value: &impl serde::Serialize,
) -> Result<(), LinesCodecError> {
    let text = serde_json::to_string(value)
        .map_err(|e| LinesCodecError::Io(std::io::Error::other(e)))?;
    framed.send(text).await
}

async fn send_event(
    framed: &mut Framed<TcpStream, LinesCodec>,
    event: &KernelEvent,
) -> Result<(), LinesCodecError> {
    let params = serde_json::to_value(event)
        .map_err(|e| LinesCodecError::Io(std::io::Error::other(e)))?;
    let frame = EventFrame::new(event.method(), params);
    send_json(framed, &frame).await
}
