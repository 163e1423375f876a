//! Daemon error taxonomy.
//!
//! Policy denials are not errors; they travel as `Decision` values. The
//! variants here cover the failures that are surfaced per-request or abort a
//! connection: storage, authentication, protocol, and lifecycle problems.

use warden_core::ProposalStatus;

/// Errors produced by the daemon's stateful components.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// SQLite-level failure. The message is masked before leaving the
    /// process; the full error goes to the log.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Payload (de)serialisation failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Lookup for an unknown proposal.
    #[error("proposal not found: {id}")]
    ProposalNotFound {
        /// The missing identifier.
        id: String,
    },

    /// A lifecycle transition that the state machine does not allow.
    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Proposal identifier.
        id: String,
        /// Current status.
        from: ProposalStatus,
        /// Requested status.
        to: ProposalStatus,
    },

    /// Token mismatch or missing handshake.
    #[error("authentication failed")]
    AuthFailed,

    /// A well-formed frame asking for something this client may not do.
    #[error("method not permitted for client type: {method}")]
    NotPermitted {
        /// The rejected method.
        method: String,
    },

    /// Unrecoverable internal state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    /// Reason string safe to surface to clients. Storage details are masked.
    #[must_use]
    pub fn masked_reason(&self) -> String {
        match self {
            Self::Storage(_) => "storage failure".to_string(),
            other => other.to_string(),
        }
    }
}
