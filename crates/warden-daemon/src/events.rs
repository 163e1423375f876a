//! Kernel events broadcast to connected control-plane clients.
//!
//! Delivery is best-effort: the bus is a `tokio::sync::broadcast` channel,
//! so a slow client lags and skips rather than stalling the kernel. Order is
//! preserved per recipient, unspecified across recipients.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Broadcast capacity. Laggards past this depth lose events.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// An event pushed to every authenticated gateway client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KernelEvent {
    /// The Sentinel reported a new focused window.
    FocusChanged {
        /// Report time.
        timestamp: DateTime<Utc>,
        /// New window title.
        window_name: String,
        /// Owning process.
        process_name: String,
    },
    /// A proposal was held and needs a human.
    ApprovalPending {
        /// Proposal id.
        request_id: String,
        /// Proposal intent.
        intent: String,
        /// Planner-scale risk (0..100).
        risk_score: u8,
        /// Hold time.
        timestamp: DateTime<Utc>,
    },
    /// Streaming text delta from an active session.
    SessionUpdate {
        /// Session id.
        session_id: String,
        /// Message id within the session.
        message_id: String,
        /// Incremental text chunk.
        delta: String,
        /// True on the final chunk.
        is_complete: bool,
        /// Speaker role.
        role: String,
        /// Chunk time.
        timestamp: DateTime<Utc>,
    },
    /// Heartbeat, every 30 seconds.
    Tick {
        /// Tick time.
        timestamp: DateTime<Utc>,
        /// Seconds since the kernel booted.
        uptime_seconds: u64,
    },
}

impl KernelEvent {
    /// The gateway method name this event is delivered under.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::FocusChanged { .. } => "focus.changed",
            Self::ApprovalPending { .. } => "approval.pending",
            Self::SessionUpdate { .. } => "session.update",
            Self::Tick { .. } => "tick",
        }
    }
}

/// Sending half of the event bus.
pub type EventBus = tokio::sync::broadcast::Sender<KernelEvent>;

/// Creates the event bus.
#[must_use]
pub fn event_bus() -> EventBus {
    tokio::sync::broadcast::channel(EVENT_BUS_CAPACITY).0
}

/// Publishes an event, ignoring the no-subscribers case.
pub fn publish(bus: &EventBus, event: KernelEvent) {
    let _ = bus.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_match_the_wire_surface() {
        let tick = KernelEvent::Tick {
            timestamp: Utc::now(),
            uptime_seconds: 1,
        };
        assert_eq!(tick.method(), "tick");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = event_bus();
        publish(
            &bus,
            KernelEvent::FocusChanged {
                timestamp: Utc::now(),
                window_name: "Notes".to_string(),
                process_name: "notes".to_string(),
            },
        );
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = event_bus();
        let mut rx = bus.subscribe();
        for i in 0..3u64 {
            publish(
                &bus,
                KernelEvent::Tick {
                    timestamp: Utc::now(),
                    uptime_seconds: i,
                },
            );
        }
        for i in 0..3u64 {
            match rx.recv().await.unwrap() {
                KernelEvent::Tick { uptime_seconds, .. } => assert_eq!(uptime_seconds, i),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }
}
