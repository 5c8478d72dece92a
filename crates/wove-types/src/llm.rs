//! Generation request types shared by the engine and its backends.
//!
//! A generation request is the full role-tagged conversation up to and
//! including the user turn. The wire shape of the `/api/chat` proxy route is
//! defined here too so the server and the HTTP backend agree on it.

use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::chat::{ChatMessage, MessageRole};

/// One role-tagged turn of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTurn {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl From<&ChatMessage> for GenerationTurn {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            attachment: message.attachment.clone(),
        }
    }
}

/// Request to a generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub turns: Vec<GenerationTurn>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Errors from a generation backend.
///
/// Any of these returned before the stream opens is a hard failure for the
/// turn; during streaming they surface as ingestion errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("generation backend returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed generation response: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// A history entry in the `/api/chat` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyTurn {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Body of `POST /api/chat`.
///
/// `message` is optional at the serde level so the route can answer a
/// missing message with a 400 instead of a deserialization rejection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ProxyTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ProxyChatRequest {
    /// Split a generation request into proxy form: the last user turn
    /// becomes `message`, everything before it the history.
    pub fn from_generation(request: &GenerationRequest) -> Self {
        let mut turns = request.turns.clone();
        let last = match turns.last() {
            Some(turn) if turn.role == MessageRole::User => turns.pop(),
            _ => None,
        };

        Self {
            message: last.as_ref().map(|t| t.content.clone()),
            conversation_history: turns
                .into_iter()
                .map(|t| ProxyTurn {
                    role: t.role,
                    content: t.content,
                    image: t.attachment.map(|a| a.to_uri()),
                })
                .collect(),
            image: last.and_then(|t| t.attachment).map(|a| a.to_uri()),
        }
    }

    /// Rebuild the role-tagged conversation the proxy forwards upstream.
    ///
    /// Returns `None` when `message` is absent. Attachments that fail to
    /// parse are dropped from the forwarded turn rather than failing it.
    pub fn into_turns(self) -> Option<Vec<GenerationTurn>> {
        let message = self.message?;
        let mut turns: Vec<GenerationTurn> = self
            .conversation_history
            .into_iter()
            .map(|t| GenerationTurn {
                role: t.role,
                content: t.content,
                attachment: t.image.and_then(|uri| Attachment::parse(&uri).ok()),
            })
            .collect();
        turns.push(GenerationTurn {
            role: MessageRole::User,
            content: message,
            attachment: self.image.and_then(|uri| Attachment::parse(&uri).ok()),
        });
        Some(turns)
    }
}
