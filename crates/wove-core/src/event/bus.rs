//! Broadcast event bus for distributing `ChatEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op.

use tokio::sync::broadcast;
use wove_types::event::ChatEvent;

/// Multi-consumer event bus for turn progress.
///
/// Clones share one channel. A subscriber that falls more than `capacity`
/// events behind sees `RecvError::Lagged` and skips ahead.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    ///
    /// Deltas are published one event each, so the capacity should cover a
    /// burst of a few hundred fragments.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: ChatEvent) {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;
    use wove_types::chat::{MessageId, SessionId};
    use wove_types::event::TurnOutcome;

    fn delta(index: usize, text: &str) -> ChatEvent {
        ChatEvent::AssistantDelta {
            session_id: SessionId::Draft(1),
            message_id: MessageId::Provisional(2),
            index,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_deltas_arrive_in_publish_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        for (i, part) in ["Linen ", "suit, ", "no tie."].iter().enumerate() {
            bus.publish(delta(i, part));
        }

        let mut text = String::new();
        for expected in 0..3 {
            match rx.recv().await.unwrap() {
                ChatEvent::AssistantDelta { index, text: part, .. } => {
                    assert_eq!(index, expected);
                    text.push_str(&part);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(text, "Linen suit, no tie.");
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_settle() {
        let bus = EventBus::new(16);
        let mut view = bus.subscribe();
        let mut log = bus.clone().subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(ChatEvent::TurnSettled {
            session_id: SessionId::Draft(1),
            outcome: TurnOutcome::Completed,
            display: None,
        });

        assert!(matches!(view.recv().await.unwrap(), ChatEvent::TurnSettled { .. }));
        assert!(matches!(log.recv().await.unwrap(), ChatEvent::TurnSettled { .. }));
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_then_resumes() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(delta(i, "x"));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert!(matches!(rx.recv().await.unwrap(), ChatEvent::AssistantDelta { index: 3, .. }));
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(delta(0, "hi"));
        assert_eq!(bus.subscriber_count(), 0);
        assert!(format!("{bus:?}").contains("subscribers: 0"));
    }
}
