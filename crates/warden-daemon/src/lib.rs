//! Warden daemon library.
//!
//! The daemon hosts the five cooperating pieces of the kernel: the focus
//! tracker and policy validator (from `warden-core`), the approval
//! coordinator, the trust and reflex store, and the control plane with its
//! three surfaces:
//!
//! - a binary RPC plane (length-prefixed prost frames, [`rpc`])
//! - a message-framed JSON plane with event broadcast ([`gateway`])
//! - an HTTP control plane for the human approval queue ([`http`])
//!
//! Everything stateful funnels through [`service::KernelService`]; transports
//! are thin adaptors over it and never duplicate policy logic.

pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gateway;
pub mod http;
pub mod rpc;
pub mod service;
pub mod storage;
pub mod token;

pub use error::DaemonError;
pub use service::KernelService;
