//! Coordinator event bus
//!
//! Broadcast channel for observers of coordinated mutations. Divergence
//! events are the reconciliation hook: the classifier deliberately lets one
//! healthy backend carry a request, so disagreement between stores is
//! normal operation that still needs to be seen.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::action::ActionKind;
use crate::classify::{ActionOutcome, StoreOutcome};
use crate::store::StoreKind;

/// Events emitted by the coordinator.
#[derive(Debug, Clone)]
pub enum ActionEvent {
    /// A mutation finished with the given caller-visible result.
    Executed {
        kind: ActionKind,
        target_id: u64,
        result: ActionOutcome,
    },
    /// The queried stores disagreed about a mutation.
    StoreDivergence {
        kind: ActionKind,
        target_id: u64,
        outcomes: Vec<(StoreKind, StoreOutcome)>,
    },
}

/// Broadcast bus for action events.
pub struct EventBus {
    sender: broadcast::Sender<ActionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: ActionEvent) {
        trace!(event = ?event, "emitting action event");
        // Send errors only mean there are no subscribers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task logging every event, for audit trails.
pub fn spawn_logging_listener(bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = bus.subscribe();

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(ActionEvent::Executed {
                    kind,
                    target_id,
                    result,
                }) => {
                    debug!(action = ?kind, target = target_id, result = ?result, "action executed");
                }
                Ok(ActionEvent::StoreDivergence {
                    kind,
                    target_id,
                    outcomes,
                }) => {
                    warn!(
                        action = ?kind,
                        target = target_id,
                        outcomes = ?outcomes,
                        "stores diverged; reconciliation needed"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(ActionEvent::Executed {
            kind: ActionKind::Follow,
            target_id: 2,
            result: ActionOutcome::Ok,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            ActionEvent::Executed { kind, target_id, .. } => {
                assert_eq!(kind, ActionKind::Follow);
                assert_eq!(target_id, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(ActionEvent::Executed {
            kind: ActionKind::Digg,
            target_id: 1,
            result: ActionOutcome::General,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
