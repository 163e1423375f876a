//! The action-out stream: approved actions on their way to the Sentinel.
//!
//! A bounded in-memory buffer with strict FIFO semantics. Enqueueing never
//! blocks the validation path: when the buffer is full the newest command is
//! dropped with a warning and already-enqueued commands keep their order.
//! A single consumer (the Sentinel's `StreamActions` subscription) drains the
//! buffer; the receiver sits behind an async mutex so a second subscriber
//! waits for the first to disconnect instead of splitting the FIFO.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use warden_core::Action;

/// Buffer capacity of the action-out stream.
pub const ACTION_BUFFER_CAPACITY: usize = 100;

/// One executable unit on its way to the Sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCommand {
    /// `{proposal-or-trace-id}-{index}`.
    pub command_id: String,
    /// Proposal this command was decomposed from.
    pub proposal_id: String,
    /// The action itself.
    pub action: Action,
}

/// Bounded FIFO of [`ActionCommand`]s.
pub struct ActionDispatcher {
    tx: mpsc::Sender<ActionCommand>,
    rx: Mutex<mpsc::Receiver<ActionCommand>>,
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionDispatcher {
    /// Creates a dispatcher with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(ACTION_BUFFER_CAPACITY)
    }

    /// Creates a dispatcher with an explicit capacity (tests).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Decomposes a proposal's actions into commands and enqueues them in
    /// order. Returns how many were accepted; the remainder were dropped
    /// against a full buffer.
    pub fn enqueue_actions(&self, proposal_id: &str, actions: &[Action]) -> usize {
        let mut accepted = 0;
        for (index, action) in actions.iter().enumerate() {
            let command = ActionCommand {
                command_id: format!("{proposal_id}-{index}"),
                proposal_id: proposal_id.to_string(),
                action: action.clone(),
            };
            if self.enqueue(command) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Enqueues one command. Never blocks; a full buffer drops the newcomer.
    pub fn enqueue(&self, command: ActionCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(
                    command_id = %dropped.command_id,
                    capacity = ACTION_BUFFER_CAPACITY,
                    "action buffer full, dropping newest command"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                tracing::error!(
                    command_id = %dropped.command_id,
                    "action buffer closed, dropping command"
                );
                false
            }
        }
    }

    /// Exclusive access to the consuming side of the stream. Held for the
    /// lifetime of one Sentinel subscription.
    pub async fn subscribe(&self) -> tokio::sync::MutexGuard<'_, mpsc::Receiver<ActionCommand>> {
        self.rx.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(id: &str) -> ActionCommand {
        ActionCommand {
            command_id: id.to_string(),
            proposal_id: "p".to_string(),
            action: Action::new("WAIT"),
        }
    }

    #[tokio::test]
    async fn drains_in_fifo_order() {
        let dispatcher = ActionDispatcher::new();
        let actions = vec![
            Action::new("CLICK"),
            Action::new("TYPE").with("text", "hello"),
            Action::new("KEY").with("key", "Enter"),
        ];
        assert_eq!(dispatcher.enqueue_actions("trace-1", &actions), 3);

        let mut rx = dispatcher.subscribe().await;
        assert_eq!(rx.recv().await.unwrap().command_id, "trace-1-0");
        assert_eq!(rx.recv().await.unwrap().command_id, "trace-1-1");
        assert_eq!(rx.recv().await.unwrap().command_id, "trace-1-2");
    }

    #[tokio::test]
    async fn full_buffer_drops_newest_and_preserves_order() {
        let dispatcher = ActionDispatcher::with_capacity(2);
        assert!(dispatcher.enqueue(command("a")));
        assert!(dispatcher.enqueue(command("b")));
        assert!(!dispatcher.enqueue(command("c")));

        let mut rx = dispatcher.subscribe().await;
        assert_eq!(rx.recv().await.unwrap().command_id, "a");
        assert_eq!(rx.recv().await.unwrap().command_id, "b");
        // "c" never shows up.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn partial_enqueue_reports_accepted_count() {
        let dispatcher = ActionDispatcher::with_capacity(1);
        let actions = vec![Action::new("CLICK"), Action::new("CLICK")];
        assert_eq!(dispatcher.enqueue_actions("t", &actions), 1);
    }
}
