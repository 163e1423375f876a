//! Domain model and policy engine for the Warden action gateway.
//!
//! This crate holds everything the daemon needs that does not touch a socket
//! or the database: the action vocabulary, proposal lifecycle, automation
//! modes, the focus tracker, the audit ring, the configuration schema, and
//! the policy validator itself.
//!
//! # Architecture
//!
//! The validator ([`policy::Validator`]) is a pure function of its inputs.
//! Stateful collaborators reach it through two narrow traits:
//!
//! - [`policy::TrustReader`] — historical success counts for an
//!   (intent, focused window) pair
//! - [`policy::AuditSink`] — receives exactly one entry per validation
//!
//! The daemon crate implements both against SQLite; tests implement them
//! in memory.

pub mod action;
pub mod audit;
pub mod config;
pub mod focus;
pub mod modes;
pub mod policy;
pub mod proposal;

pub use action::{Action, ActionType, RiskLevel};
pub use audit::{AuditEntry, AuditRing, AUDIT_COMPACT_LEN, AUDIT_MAX_LEN};
pub use config::{KernelConfig, NetworkConfig, SecurityConfig, SystemConfig};
pub use focus::{FocusSnapshot, FocusTracker};
pub use modes::{AutomationMode, SystemMode};
pub use policy::{AuditSink, PolicyConfig, TrustReader, Validator, ERROR_CODE_FOCUS_MISMATCH};
pub use proposal::{
    Decision, InteractionType, Proposal, ProposalRecord, ProposalStatus,
    AUTO_APPROVE_RISK_CEILING,
};
