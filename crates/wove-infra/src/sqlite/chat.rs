//! SQLite chat repository implementation.
//!
//! Implements `ChatRepository` from `wove-core` using sqlx with split
//! read/write pools: raw queries, private Row structs, reads on the reader
//! pool, and multi-statement writes in a transaction on the writer.
//!
//! Every statement is scoped by `owner_id`. A session owned by someone else
//! produces the same `NotFoundOrForbidden` as one that does not exist.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use uuid::Uuid;
use wove_core::chat::repository::ChatRepository;
use wove_core::chat::title::{derive_title, is_first_user_message};
use wove_types::attachment::Attachment;
use wove_types::chat::{
    ChatMessage, ChatSession, DEFAULT_SESSION_TITLE, GREETING, MessageId, MessageRole, OwnerId, SessionId,
};
use wove_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ChatRepository`.
pub struct SqliteChatRepository {
    pool: DatabasePool,
}

impl SqliteChatRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn messages_for(&self, session_id: &Uuid) -> Result<Vec<ChatMessage>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM chat_messages WHERE session_id = ? ORDER BY seq ASC")
            .bind(session_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let msg_row = ChatMessageRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            messages.push(msg_row.into_message()?);
        }
        Ok(messages)
    }

    /// Overwrite a message's content, optionally marking it edited.
    async fn write_content(
        &self,
        session_id: &Uuid,
        message_id: &Uuid,
        content: &str,
        owner: &OwnerId,
        edited: bool,
    ) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = sqlx::query(
            r#"UPDATE chat_messages
               SET content = ?, updated_at = ?, edited_at = CASE WHEN ? THEN ? ELSE edited_at END
               WHERE id = ? AND session_id = ?
                 AND EXISTS (SELECT 1 FROM chat_sessions WHERE id = ? AND owner_id = ?)"#,
        )
        .bind(content)
        .bind(&now)
        .bind(edited)
        .bind(&now)
        .bind(message_id.to_string())
        .bind(session_id.to_string())
        .bind(session_id.to_string())
        .bind(owner.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFoundOrForbidden);
        }

        sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ChatSessionRow {
    id: String,
    title: String,
    updated_at: String,
}

impl ChatSessionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_session(self, messages: Vec<ChatMessage>) -> Result<ChatSession, RepositoryError> {
        let id = Uuid::parse_str(&self.id).map_err(|e| RepositoryError::Query(format!("invalid session id: {e}")))?;

        Ok(ChatSession {
            id: SessionId::Durable(id),
            title: self.title,
            updated_at: parse_datetime(&self.updated_at)?,
            messages,
        })
    }
}

struct ChatMessageRow {
    id: String,
    session_id: String,
    role: String,
    content: String,
    attachment: Option<String>,
    created_at: String,
    edited_at: Option<String>,
}

impl ChatMessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            attachment: row.try_get("attachment")?,
            created_at: row.try_get("created_at")?,
            edited_at: row.try_get("edited_at")?,
        })
    }

    fn into_message(self) -> Result<ChatMessage, RepositoryError> {
        let id = Uuid::parse_str(&self.id).map_err(|e| RepositoryError::Query(format!("invalid message id: {e}")))?;
        let role: MessageRole = self.role.parse().map_err(RepositoryError::Query)?;
        let attachment = self
            .attachment
            .as_deref()
            .map(serde_json::from_str::<Attachment>)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid attachment: {e}")))?;

        Ok(ChatMessage {
            id: MessageId::Durable(id),
            role,
            content: self.content,
            attachment,
            created_at: parse_datetime(&self.created_at)?,
            edited_at: self.edited_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so `ORDER BY updated_at` is chronological.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_attachment(attachment: Option<&Attachment>) -> Result<Option<String>, RepositoryError> {
    attachment
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RepositoryError::Query(format!("attachment encoding failed: {e}")))
}

// ---------------------------------------------------------------------------
// ChatRepository implementation
// ---------------------------------------------------------------------------

impl ChatRepository for SqliteChatRepository {
    async fn list_sessions(&self, owner: &OwnerId) -> Result<Vec<ChatSession>, RepositoryError> {
        let session_rows = sqlx::query("SELECT * FROM chat_sessions WHERE owner_id = ? ORDER BY updated_at DESC")
            .bind(owner.as_str())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let message_rows = sqlx::query(
            r#"SELECT m.* FROM chat_messages m
               JOIN chat_sessions s ON s.id = m.session_id
               WHERE s.owner_id = ?
               ORDER BY m.session_id, m.seq ASC"#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut by_session: HashMap<String, Vec<ChatMessage>> = HashMap::new();
        for row in &message_rows {
            let msg_row = ChatMessageRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            let session_id = msg_row.session_id.clone();
            by_session.entry(session_id).or_default().push(msg_row.into_message()?);
        }

        let mut sessions = Vec::with_capacity(session_rows.len());
        for row in &session_rows {
            let session_row = ChatSessionRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            let messages = by_session.remove(&session_row.id).unwrap_or_default();
            sessions.push(session_row.into_session(messages)?);
        }

        Ok(sessions)
    }

    async fn get_session(&self, session_id: &Uuid, owner: &OwnerId) -> Result<ChatSession, RepositoryError> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ? AND owner_id = ?")
            .bind(session_id.to_string())
            .bind(owner.as_str())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .ok_or(RepositoryError::NotFoundOrForbidden)?;

        let session_row = ChatSessionRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        let messages = self.messages_for(session_id).await?;
        session_row.into_session(messages)
    }

    async fn create_session(&self, owner: &OwnerId) -> Result<ChatSession, RepositoryError> {
        let now = Utc::now();
        let session_id = Uuid::now_v7();
        let greeting_id = Uuid::now_v7();

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO chat_sessions (id, owner_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id.to_string())
        .bind(owner.as_str())
        .bind(DEFAULT_SESSION_TITLE)
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO chat_messages (id, session_id, seq, role, content, attachment, created_at, updated_at)
               VALUES (?, ?, 0, 'assistant', ?, NULL, ?, ?)"#,
        )
        .bind(greeting_id.to_string())
        .bind(session_id.to_string())
        .bind(GREETING)
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(ChatSession {
            id: SessionId::Durable(session_id),
            title: DEFAULT_SESSION_TITLE.to_string(),
            updated_at: now,
            messages: vec![ChatMessage {
                id: MessageId::Durable(greeting_id),
                role: MessageRole::Assistant,
                content: GREETING.to_string(),
                attachment: None,
                created_at: now,
                edited_at: None,
            }],
        })
    }

    async fn delete_session(&self, session_id: &Uuid, owner: &OwnerId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ? AND owner_id = ?")
            .bind(session_id.to_string())
            .bind(owner.as_str())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFoundOrForbidden);
        }

        Ok(())
    }

    async fn append_message(
        &self,
        session_id: &Uuid,
        message: &ChatMessage,
        owner: &OwnerId,
    ) -> Result<ChatMessage, RepositoryError> {
        let now = Utc::now();
        let message_id = Uuid::now_v7();
        let attachment = encode_attachment(message.attachment.as_ref())?;

        // Single writer connection: the count and the insert cannot interleave
        // with another append.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let row = sqlx::query(
            r#"SELECT s.title AS title,
                      (SELECT COUNT(*) FROM chat_messages WHERE session_id = s.id) AS message_count,
                      (SELECT COALESCE(MAX(seq), -1) FROM chat_messages WHERE session_id = s.id) AS max_seq
               FROM chat_sessions s WHERE s.id = ? AND s.owner_id = ?"#,
        )
        .bind(session_id.to_string())
        .bind(owner.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .ok_or(RepositoryError::NotFoundOrForbidden)?;

        let title: String = row.try_get("title").map_err(|e| RepositoryError::Query(e.to_string()))?;
        let message_count: i64 = row
            .try_get("message_count")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let max_seq: i64 = row.try_get("max_seq").map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO chat_messages (id, session_id, seq, role, content, attachment, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message_id.to_string())
        .bind(session_id.to_string())
        .bind(max_seq + 1)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(attachment)
        .bind(format_datetime(&message.created_at))
        .bind(format_datetime(&now))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let first = is_first_user_message(message_count as usize, message.role);
        let title = derive_title(&title, first, &message.content);
        sqlx::query("UPDATE chat_sessions SET title = ?, updated_at = ? WHERE id = ?")
            .bind(&title)
            .bind(format_datetime(&now))
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(ChatMessage {
            id: MessageId::Durable(message_id),
            role: message.role,
            content: message.content.clone(),
            attachment: message.attachment.clone(),
            created_at: message.created_at,
            edited_at: None,
        })
    }

    async fn update_message_content(
        &self,
        session_id: &Uuid,
        message_id: &Uuid,
        content: &str,
        owner: &OwnerId,
    ) -> Result<(), RepositoryError> {
        self.write_content(session_id, message_id, content, owner, false).await
    }

    async fn edit_message_content(
        &self,
        session_id: &Uuid,
        message_id: &Uuid,
        content: &str,
        owner: &OwnerId,
    ) -> Result<(), RepositoryError> {
        self.write_content(session_id, message_id, content, owner, true).await
    }

    async fn rename_session(&self, session_id: &Uuid, title: &str, owner: &OwnerId) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE chat_sessions SET title = ? WHERE id = ? AND owner_id = ?")
            .bind(title)
            .bind(session_id.to_string())
            .bind(owner.as_str())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFoundOrForbidden);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_repo() -> SqliteChatRepository {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        // Leak tempdir so it lives for the test
        std::mem::forget(dir);
        SqliteChatRepository::new(DatabasePool::new(&url).await.unwrap())
    }

    fn alice() -> OwnerId {
        OwnerId::new("alice")
    }

    fn user(content: &str) -> ChatMessage {
        ChatMessage::provisional(1, MessageRole::User, content, None)
    }

    fn durable(session: &ChatSession) -> Uuid {
        session.id.durable().unwrap()
    }

    #[tokio::test]
    async fn test_create_session_includes_greeting() {
        let repo = test_repo().await;
        let created = repo.create_session(&alice()).await.unwrap();

        assert_eq!(created.title, DEFAULT_SESSION_TITLE);
        assert_eq!(created.message_count(), 1);
        assert_eq!(created.messages[0].role, MessageRole::Assistant);
        assert_eq!(created.messages[0].content, GREETING);

        let fetched = repo.get_session(&durable(&created), &alice()).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.messages[0].id, created.messages[0].id);
    }

    #[tokio::test]
    async fn test_append_preserves_order_and_sets_title() {
        let repo = test_repo().await;
        let session = repo.create_session(&alice()).await.unwrap();
        let id = durable(&session);

        let first = repo
            .append_message(&id, &user("Suggest an outfit for a beach wedding"), &alice())
            .await
            .unwrap();
        assert!(!first.id.is_provisional());
        let reply = ChatMessage::provisional(2, MessageRole::Assistant, "", None);
        repo.append_message(&id, &reply, &alice()).await.unwrap();
        repo.append_message(&id, &user("and shoes?"), &alice()).await.unwrap();

        let fetched = repo.get_session(&id, &alice()).await.unwrap();
        let contents: Vec<&str> = fetched.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec![GREETING, "Suggest an outfit for a beach wedding", "", "and shoes?"]);
        assert_eq!(fetched.title, "Suggest an outfit for a beach wedding");
    }

    #[tokio::test]
    async fn test_long_first_message_title_is_truncated() {
        let repo = test_repo().await;
        let session = repo.create_session(&alice()).await.unwrap();
        let id = durable(&session);

        repo.append_message(&id, &user(&"y".repeat(80)), &alice()).await.unwrap();
        let fetched = repo.get_session(&id, &alice()).await.unwrap();
        assert_eq!(fetched.title.chars().count(), 53);
        assert!(fetched.title.ends_with("..."));
    }

    #[tokio::test]
    async fn test_list_sessions_most_recent_first() {
        let repo = test_repo().await;
        let older = repo.create_session(&alice()).await.unwrap();
        let newer = repo.create_session(&alice()).await.unwrap();
        repo.create_session(&OwnerId::new("bob")).await.unwrap();

        // Appending bumps the older session to the top.
        repo.append_message(&durable(&older), &user("hello"), &alice())
            .await
            .unwrap();

        let sessions = repo.list_sessions(&alice()).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, older.id);
        assert_eq!(sessions[1].id, newer.id);
        assert_eq!(sessions[0].message_count(), 2);
        assert_eq!(sessions[1].message_count(), 1);
    }

    #[tokio::test]
    async fn test_update_content_bumps_updated_at() {
        let repo = test_repo().await;
        let session = repo.create_session(&alice()).await.unwrap();
        let id = durable(&session);
        let reply = repo
            .append_message(&id, &ChatMessage::provisional(1, MessageRole::Assistant, "", None), &alice())
            .await
            .unwrap();
        let before = repo.get_session(&id, &alice()).await.unwrap().updated_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        repo.update_message_content(&id, &reply.id.durable().unwrap(), "Linen", &alice())
            .await
            .unwrap();

        let fetched = repo.get_session(&id, &alice()).await.unwrap();
        let message = fetched.message(&reply.id).unwrap();
        assert_eq!(message.content, "Linen");
        assert!(message.edited_at.is_none());
        assert!(fetched.updated_at > before);
    }

    #[tokio::test]
    async fn test_edit_marks_message_edited() {
        let repo = test_repo().await;
        let session = repo.create_session(&alice()).await.unwrap();
        let id = durable(&session);
        let message = repo.append_message(&id, &user("typo"), &alice()).await.unwrap();

        repo.edit_message_content(&id, &message.id.durable().unwrap(), "fixed", &alice())
            .await
            .unwrap();

        let fetched = repo.get_session(&id, &alice()).await.unwrap();
        let edited = fetched.message(&message.id).unwrap();
        assert_eq!(edited.content, "fixed");
        assert!(edited.edited_at.is_some());
    }

    #[tokio::test]
    async fn test_other_owner_sees_not_found() {
        let repo = test_repo().await;
        let session = repo.create_session(&alice()).await.unwrap();
        let id = durable(&session);
        let greeting = session.messages[0].id.durable().unwrap();
        let bob = OwnerId::new("bob");

        assert!(matches!(
            repo.get_session(&id, &bob).await,
            Err(RepositoryError::NotFoundOrForbidden)
        ));
        assert!(matches!(
            repo.append_message(&id, &user("hi"), &bob).await,
            Err(RepositoryError::NotFoundOrForbidden)
        ));
        assert!(matches!(
            repo.update_message_content(&id, &greeting, "x", &bob).await,
            Err(RepositoryError::NotFoundOrForbidden)
        ));
        assert!(matches!(
            repo.rename_session(&id, "mine now", &bob).await,
            Err(RepositoryError::NotFoundOrForbidden)
        ));
        assert!(matches!(
            repo.delete_session(&id, &bob).await,
            Err(RepositoryError::NotFoundOrForbidden)
        ));

        let untouched = repo.get_session(&id, &alice()).await.unwrap();
        assert_eq!(untouched.title, DEFAULT_SESSION_TITLE);
        assert_eq!(untouched.messages[0].content, GREETING);
    }

    #[tokio::test]
    async fn test_delete_cascades_messages() {
        let repo = test_repo().await;
        let session = repo.create_session(&alice()).await.unwrap();
        let id = durable(&session);
        repo.append_message(&id, &user("bye"), &alice()).await.unwrap();

        repo.delete_session(&id, &alice()).await.unwrap();
        assert!(repo.list_sessions(&alice()).await.unwrap().is_empty());

        let orphans: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_messages")
            .fetch_one(&repo.pool.reader)
            .await
            .unwrap();
        assert_eq!(orphans.0, 0);

        assert!(matches!(
            repo.delete_session(&id, &alice()).await,
            Err(RepositoryError::NotFoundOrForbidden)
        ));
    }

    #[tokio::test]
    async fn test_rename_is_kept_over_first_message() {
        let repo = test_repo().await;
        let session = repo.create_session(&alice()).await.unwrap();
        let id = durable(&session);

        repo.rename_session(&id, "Gala prep", &alice()).await.unwrap();
        repo.append_message(&id, &user("black tie?"), &alice()).await.unwrap();

        let fetched = repo.get_session(&id, &alice()).await.unwrap();
        assert_eq!(fetched.title, "Gala prep");
    }

    #[tokio::test]
    async fn test_attachment_is_stored_with_message() {
        let repo = test_repo().await;
        let session = repo.create_session(&alice()).await.unwrap();
        let id = durable(&session);
        let attachment = Attachment::parse("https://example.com/coat.jpg").unwrap();
        let message = ChatMessage::provisional(1, MessageRole::User, "", Some(attachment.clone()));

        repo.append_message(&id, &message, &alice()).await.unwrap();
        let fetched = repo.get_session(&id, &alice()).await.unwrap();
        assert_eq!(fetched.messages[1].attachment, Some(attachment));
        assert_eq!(fetched.title, DEFAULT_SESSION_TITLE);
    }
}
