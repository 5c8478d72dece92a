//! Chat session and message types for Wove.
//!
//! Identifiers are tagged: a message starts with a provisional, client-local id
//! and is rewritten exactly once to the durable id issued by the persistence
//! gateway. A session starts either as a draft (client-only) or durable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::attachment::Attachment;
use crate::error::IdentityError;

/// Title every session starts with until the first user message arrives.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Greeting the assistant opens every session with.
pub const GREETING: &str = "Hello there, I am Wove, your personal fashion Assistant! Ready to help you with all your fashion/styling needs! To get started, do you have any specific outfit choices you have in mind?👔";

/// Content shown in place of an assistant reply when generation fails.
pub const APOLOGY: &str = "Sorry, something went wrong. Please try again.";

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// Opaque identifier of the viewer who owns a set of sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a chat session.
///
/// `Draft` is the sentinel for a session that exists only on the client. The
/// epoch distinguishes successive drafts so a late caller can never promote a
/// draft it did not observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SessionId {
    Draft(u64),
    Durable(Uuid),
}

impl SessionId {
    pub fn is_draft(&self) -> bool {
        matches!(self, SessionId::Draft(_))
    }

    /// The durable id, if this session has been promoted.
    pub fn durable(&self) -> Option<Uuid> {
        match self {
            SessionId::Durable(id) => Some(*id),
            SessionId::Draft(_) => None,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionId::Draft(epoch) => write!(f, "draft-{epoch}"),
            SessionId::Durable(id) => write!(f, "{id}"),
        }
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        SessionId::Durable(id)
    }
}

/// Identity of a chat message: client-local until persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageId {
    Provisional(u64),
    Durable(Uuid),
}

impl MessageId {
    pub fn is_provisional(&self) -> bool {
        matches!(self, MessageId::Provisional(_))
    }

    pub fn durable(&self) -> Option<Uuid> {
        match self {
            MessageId::Durable(id) => Some(*id),
            MessageId::Provisional(_) => None,
        }
    }

    /// Rewrite a provisional id to its durable counterpart.
    ///
    /// This is the only transition a message id may make; promoting an id
    /// that is already durable is rejected.
    pub fn promote(&mut self, durable: Uuid) -> Result<(), IdentityError> {
        match *self {
            MessageId::Provisional(_) => {
                *self = MessageId::Durable(durable);
                Ok(())
            }
            MessageId::Durable(existing) => Err(IdentityError::AlreadyDurable(existing)),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Provisional(local) => write!(f, "local-{local}"),
            MessageId::Durable(id) => write!(f, "{id}"),
        }
    }
}

/// Monotonic source of provisional ids, unique for the lifetime of a client.
#[derive(Debug)]
pub struct LocalIdGenerator {
    next: AtomicU64,
}

impl LocalIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for LocalIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// A single message within a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    /// Image payload or reference, fixed at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    /// Set when a human corrected the content after the turn settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Create a message that has not been persisted yet.
    pub fn provisional(
        local_id: u64,
        role: MessageRole,
        content: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> Self {
        Self {
            id: MessageId::Provisional(local_id),
            role,
            content: content.into(),
            attachment,
            created_at: Utc::now(),
            edited_at: None,
        }
    }
}

/// A conversation as seen by the current viewer.
///
/// The message count is always `messages.len()`; there is no separately
/// stored counter that could drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
}

impl ChatSession {
    /// A client-only session holding just the local greeting.
    pub fn draft(epoch: u64, greeting_local_id: u64) -> Self {
        Self {
            id: SessionId::Draft(epoch),
            title: DEFAULT_SESSION_TITLE.to_string(),
            updated_at: Utc::now(),
            messages: vec![ChatMessage::provisional(
                greeting_local_id,
                MessageRole::Assistant,
                GREETING,
                None,
            )],
        }
    }

    pub fn is_draft(&self) -> bool {
        self.id.is_draft()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn message(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }
}

/// Compact row for session lists (sidebar, CLI tables).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

impl From<&ChatSession> for SessionSummary {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id,
            title: session.title.clone(),
            updated_at: session.updated_at,
            message_count: session.message_count(),
        }
    }
}
