//! ChatRepository trait definition.
//!
//! The persistence gateway for sessions and messages. Every operation is
//! scoped to an owner; a session that does not exist and a session owned by
//! someone else are indistinguishable to the caller
//! (`RepositoryError::NotFoundOrForbidden`).

use wove_types::chat::{ChatMessage, ChatSession, OwnerId};
use wove_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for chat session and message persistence.
///
/// Implementations live in wove-infra (e.g., `SqliteChatRepository`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ChatRepository: Send + Sync {
    /// All sessions of an owner, most recently updated first, each with its
    /// messages in conversation order.
    fn list_sessions(
        &self,
        owner: &OwnerId,
    ) -> impl std::future::Future<Output = Result<Vec<ChatSession>, RepositoryError>> + Send;

    /// A single session with its messages.
    fn get_session(
        &self,
        session_id: &Uuid,
        owner: &OwnerId,
    ) -> impl std::future::Future<Output = Result<ChatSession, RepositoryError>> + Send;

    /// Create a durable session holding the server-assigned greeting.
    fn create_session(
        &self,
        owner: &OwnerId,
    ) -> impl std::future::Future<Output = Result<ChatSession, RepositoryError>> + Send;

    /// Delete a session and its messages.
    fn delete_session(
        &self,
        session_id: &Uuid,
        owner: &OwnerId,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist a message at the end of a session and return it with its
    /// durable id. The provisional id of `message` is ignored.
    fn append_message(
        &self,
        session_id: &Uuid,
        message: &ChatMessage,
        owner: &OwnerId,
    ) -> impl std::future::Future<Output = Result<ChatMessage, RepositoryError>> + Send;

    /// Overwrite the content of a message while it is being generated.
    fn update_message_content(
        &self,
        session_id: &Uuid,
        message_id: &Uuid,
        content: &str,
        owner: &OwnerId,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite the content of a settled message and mark it edited.
    fn edit_message_content(
        &self,
        session_id: &Uuid,
        message_id: &Uuid,
        content: &str,
        owner: &OwnerId,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Set an explicit session title.
    fn rename_session(
        &self,
        session_id: &Uuid,
        title: &str,
        owner: &OwnerId,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
