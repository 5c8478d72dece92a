use thiserror::Error;
use uuid::Uuid;

use crate::chat::{MessageId, SessionId};

/// Errors from persistence gateway operations (trait defined in wove-core).
///
/// Ownership mismatches are reported as `NotFoundOrForbidden`, never as a
/// distinct "forbidden" signal.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("session or message not found")]
    NotFoundOrForbidden,
}

/// Violations of the provisional-to-durable identifier transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identifier is already durable ({0})")]
    AlreadyDurable(Uuid),
}

/// Rejected mutations of the in-memory session store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("unknown message {message} in session {session}")]
    UnknownMessage { session: SessionId, message: MessageId },

    #[error("draft session {0} must be promoted before messages are appended")]
    DraftNotPromoted(SessionId),

    #[error("draft session {0} was deleted before its promotion finished")]
    DraftDeleted(SessionId),

    #[error("session {0} already has a streaming assistant message")]
    AlreadyStreaming(SessionId),

    #[error("message {0} is not the streaming assistant message")]
    NotStreaming(MessageId),

    #[error("message {0} is still streaming")]
    StillStreaming(MessageId),

    #[error("only assistant messages can stream content")]
    NotAssistant,

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Invalid image attachments.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment is not an image: '{0}'")]
    NotAnImage(String),

    #[error("attachment is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("invalid attachment encoding: {0}")]
    InvalidEncoding(String),

    #[error("unsupported attachment scheme: '{0}'")]
    UnsupportedScheme(String),
}

/// Errors surfaced by the engine's imperative operations.
///
/// Everything that happens after a turn is accepted resolves to a turn
/// report instead; these cover rejected requests and failed management calls.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("nothing to send: message text and attachment are both empty")]
    EmptySubmission,

    #[error("a turn is already in flight for session {0}")]
    TurnInFlight(SessionId),

    #[error("could not create session: {0}")]
    SessionPromotion(String),

    #[error("session or message not found")]
    NotFoundOrForbidden,

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("session title must not be empty")]
    InvalidTitle,

    #[error(transparent)]
    InvalidAttachment(#[from] AttachmentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<RepositoryError> for ChatError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFoundOrForbidden => ChatError::NotFoundOrForbidden,
            other => ChatError::Persistence(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_not_found_hides_ownership() {
        let err = ChatError::from(RepositoryError::NotFoundOrForbidden);
        assert!(matches!(err, ChatError::NotFoundOrForbidden));
        assert!(!err.to_string().contains("forbidden"));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DraftNotPromoted(SessionId::Draft(2));
        assert!(err.to_string().contains("draft-2"));
    }
}
