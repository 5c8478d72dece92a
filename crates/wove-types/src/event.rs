//! Event types for the Wove chat event bus.
//!
//! `ChatEvent` is broadcast by the engine while turns progress. All variants
//! are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::{MessageId, SessionId};

/// Terminal state of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The stream ended cleanly; the final content is persisted.
    Completed,
    /// The stream failed; the apology replaced the content.
    Failed,
    /// The turn was cancelled; partial content was kept.
    Cancelled,
    /// The session could not be made durable; nothing was appended.
    Abandoned,
}

impl std::fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnOutcome::Completed => write!(f, "completed"),
            TurnOutcome::Failed => write!(f, "failed"),
            TurnOutcome::Cancelled => write!(f, "cancelled"),
            TurnOutcome::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Events emitted while the engine processes turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A draft session received its durable identity.
    SessionPromoted { draft_epoch: u64, session_id: Uuid },

    /// A user turn was accepted for a session.
    TurnStarted { session_id: SessionId },

    /// A content delta was folded into the streaming assistant message.
    AssistantDelta {
        session_id: SessionId,
        message_id: MessageId,
        index: usize,
        text: String,
    },

    /// A persistence write failed; local and durable views may diverge.
    PersistenceDegraded { session_id: SessionId, reason: String },

    /// A turn reached its terminal state.
    TurnSettled {
        session_id: SessionId,
        outcome: TurnOutcome,
        display: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ChatEvent::TurnSettled {
            session_id: SessionId::Draft(0),
            outcome: TurnOutcome::Cancelled,
            display: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "turn_settled");
        assert_eq!(json["outcome"], "cancelled");
    }
}
