//! Session persistence HTTP handlers.
//!
//! Endpoints (all scoped by the `X-Wove-Owner` header):
//! - GET    /api/v1/sessions                                   - List sessions
//! - POST   /api/v1/sessions                                   - Create a session with its greeting
//! - GET    /api/v1/sessions/{id}                              - Get a session with messages
//! - PATCH  /api/v1/sessions/{id}                              - Rename a session
//! - DELETE /api/v1/sessions/{id}                              - Delete a session
//! - POST   /api/v1/sessions/{id}/messages                     - Append a message
//! - PUT    /api/v1/sessions/{id}/messages/{message_id}/content - Overwrite streamed content
//! - PATCH  /api/v1/sessions/{id}/messages/{message_id}        - Edit a settled message

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wove_core::chat::repository::ChatRepository;
use wove_types::attachment::Attachment;
use wove_types::chat::{ChatMessage, ChatSession, MessageRole};

use crate::http::error::AppError;
use crate::http::extractors::owner::Owner;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

impl From<ChatMessage> for MessageBody {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.id.to_string(),
            role: message.role,
            content: message.content,
            image: message.attachment.map(|a| a.to_uri()),
            created_at: message.created_at,
            edited_at: message.edited_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionBody {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<MessageBody>,
}

impl From<ChatSession> for SessionBody {
    fn from(session: ChatSession) -> Self {
        Self {
            id: session.id.to_string(),
            title: session.title,
            updated_at: session.updated_at,
            messages: session.messages.into_iter().map(MessageBody::from).collect(),
        }
    }
}

/// List entry: the session without its messages.
#[derive(Debug, Serialize)]
pub struct SessionSummaryBody {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

impl From<&ChatSession> for SessionSummaryBody {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id.to_string(),
            title: session.title.clone(),
            updated_at: session.updated_at,
            message_count: session.message_count(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameBody {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageBody {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    /// `data:` URL or `http(s)` URL of an image.
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContentBody {
    pub content: String,
}

/// Parse a UUID from a path parameter, returning a 400 error on invalid format.
fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    s.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("Invalid UUID: {s}")))
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// GET /api/v1/sessions - List the owner's sessions, most recent first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<ApiResponse<Vec<SessionSummaryBody>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let sessions = state.chat_repo.list_sessions(&owner).await?;
    let body = sessions.iter().map(SessionSummaryBody::from).collect();

    let resp = ApiResponse::success(body, request_id, elapsed_ms(start)).with_link("self", "/api/v1/sessions");
    Ok(Json(resp))
}

/// POST /api/v1/sessions - Create a session holding the greeting.
pub async fn create_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<(StatusCode, Json<ApiResponse<SessionBody>>), AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let session = state.chat_repo.create_session(&owner).await?;
    let location = format!("/api/v1/sessions/{}", session.id);

    let resp = ApiResponse::success(SessionBody::from(session), request_id, elapsed_ms(start))
        .with_link("self", &location);
    Ok((StatusCode::CREATED, Json(resp)))
}

/// GET /api/v1/sessions/{id} - Get a session with its messages.
pub async fn get_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<SessionBody>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let sid = parse_uuid(&session_id)?;
    let session = state.chat_repo.get_session(&sid, &owner).await?;

    let resp = ApiResponse::success(SessionBody::from(session), request_id, elapsed_ms(start))
        .with_link("self", &format!("/api/v1/sessions/{sid}"))
        .with_link("messages", &format!("/api/v1/sessions/{sid}/messages"));
    Ok(Json(resp))
}

/// PATCH /api/v1/sessions/{id} - Set an explicit title.
pub async fn rename_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let sid = parse_uuid(&session_id)?;
    let title = body.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title must not be empty".to_string()));
    }

    state.chat_repo.rename_session(&sid, title, &owner).await?;

    let resp = ApiResponse::success(
        serde_json::json!({"session_id": sid.to_string(), "title": title}),
        request_id,
        elapsed_ms(start),
    );
    Ok(Json(resp))
}

/// DELETE /api/v1/sessions/{id} - Delete a session and its messages.
pub async fn delete_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let sid = parse_uuid(&session_id)?;
    state.chat_repo.delete_session(&sid, &owner).await?;

    let resp = ApiResponse::success(serde_json::json!({"deleted": true}), request_id, elapsed_ms(start));
    Ok(Json(resp))
}

/// POST /api/v1/sessions/{id}/messages - Append a message at the end.
pub async fn append_message(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<String>,
    Json(body): Json<AppendMessageBody>,
) -> Result<(StatusCode, Json<ApiResponse<MessageBody>>), AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let sid = parse_uuid(&session_id)?;
    let attachment = body.image.as_deref().map(Attachment::parse).transpose()?;
    // The gateway assigns the durable id; the local one is never stored.
    let message = ChatMessage::provisional(0, body.role, body.content, attachment);

    let persisted = state.chat_repo.append_message(&sid, &message, &owner).await?;

    let resp = ApiResponse::success(MessageBody::from(persisted), request_id, elapsed_ms(start))
        .with_link("session", &format!("/api/v1/sessions/{sid}"));
    Ok((StatusCode::CREATED, Json(resp)))
}

/// PUT /api/v1/sessions/{id}/messages/{message_id}/content - Overwrite the
/// content of a message being generated.
pub async fn update_message_content(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path((session_id, message_id)): Path<(String, String)>,
    Json(body): Json<ContentBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let sid = parse_uuid(&session_id)?;
    let mid = parse_uuid(&message_id)?;
    state
        .chat_repo
        .update_message_content(&sid, &mid, &body.content, &owner)
        .await?;

    let resp = ApiResponse::success(serde_json::json!({"updated": true}), request_id, elapsed_ms(start));
    Ok(Json(resp))
}

/// PATCH /api/v1/sessions/{id}/messages/{message_id} - Edit a settled
/// message and mark it edited.
pub async fn edit_message(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path((session_id, message_id)): Path<(String, String)>,
    Json(body): Json<ContentBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let sid = parse_uuid(&session_id)?;
    let mid = parse_uuid(&message_id)?;
    state
        .chat_repo
        .edit_message_content(&sid, &mid, &body.content, &owner)
        .await?;

    let resp = ApiResponse::success(serde_json::json!({"edited": true}), request_id, elapsed_ms(start));
    Ok(Json(resp))
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use wove_types::chat::{DEFAULT_SESSION_TITLE, GREETING};

    use crate::http::testing::{TestServer, spawn_server};

    async fn create(server: &TestServer, owner: &str) -> Value {
        let resp = server
            .client
            .post(server.url("/api/v1/sessions"))
            .header("x-wove-owner", owner)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        resp.json::<Value>().await.unwrap()["data"].clone()
    }

    #[tokio::test]
    async fn test_create_then_list_and_get() {
        let server = spawn_server(None).await;
        let session = create(&server, "alice").await;
        assert_eq!(session["title"], DEFAULT_SESSION_TITLE);
        assert_eq!(session["messages"][0]["role"], "assistant");
        assert_eq!(session["messages"][0]["content"], GREETING);

        let id = session["id"].as_str().unwrap().to_string();
        let list: Value = server
            .client
            .get(server.url("/api/v1/sessions"))
            .header("x-wove-owner", "alice")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["data"][0]["id"], id.as_str());
        assert_eq!(list["data"][0]["message_count"], 1);

        let got = server
            .client
            .get(server.url(&format!("/api/v1/sessions/{id}")))
            .header("x-wove-owner", "alice")
            .send()
            .await
            .unwrap();
        assert_eq!(got.status(), 200);
    }

    #[tokio::test]
    async fn test_missing_owner_is_unauthorized() {
        let server = spawn_server(None).await;
        let resp = server.client.get(server.url("/api/v1/sessions")).send().await.unwrap();
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn test_other_owner_sees_not_found() {
        let server = spawn_server(None).await;
        let session = create(&server, "alice").await;
        let id = session["id"].as_str().unwrap();

        let resp = server
            .client
            .get(server.url(&format!("/api/v1/sessions/{id}")))
            .header("x-wove-owner", "mallory")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = server
            .client
            .delete(server.url(&format!("/api/v1/sessions/{id}")))
            .header("x-wove-owner", "mallory")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["errors"][0]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_append_sets_title_and_content_updates() {
        let server = spawn_server(None).await;
        let session = create(&server, "alice").await;
        let id = session["id"].as_str().unwrap();

        let resp = server
            .client
            .post(server.url(&format!("/api/v1/sessions/{id}/messages")))
            .header("x-wove-owner", "alice")
            .json(&json!({"role": "user", "content": "What goes with navy chinos?"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);

        let resp = server
            .client
            .post(server.url(&format!("/api/v1/sessions/{id}/messages")))
            .header("x-wove-owner", "alice")
            .json(&json!({"role": "assistant", "content": ""}))
            .send()
            .await
            .unwrap();
        let assistant: Value = resp.json().await.unwrap();
        let message_id = assistant["data"]["id"].as_str().unwrap();

        let resp = server
            .client
            .put(server.url(&format!("/api/v1/sessions/{id}/messages/{message_id}/content")))
            .header("x-wove-owner", "alice")
            .json(&json!({"content": "A white oxford shirt."}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let got: Value = server
            .client
            .get(server.url(&format!("/api/v1/sessions/{id}")))
            .header("x-wove-owner", "alice")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(got["data"]["title"], "What goes with navy chinos?");
        assert_eq!(got["data"]["messages"].as_array().unwrap().len(), 3);
        assert_eq!(got["data"]["messages"][2]["content"], "A white oxford shirt.");
        assert!(got["data"]["messages"][2].get("edited_at").is_none());
    }

    #[tokio::test]
    async fn test_edit_marks_message_edited() {
        let server = spawn_server(None).await;
        let session = create(&server, "alice").await;
        let id = session["id"].as_str().unwrap();
        let greeting_id = session["messages"][0]["id"].as_str().unwrap();

        let resp = server
            .client
            .patch(server.url(&format!("/api/v1/sessions/{id}/messages/{greeting_id}")))
            .header("x-wove-owner", "alice")
            .json(&json!({"content": "Hi again"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let got: Value = server
            .client
            .get(server.url(&format!("/api/v1/sessions/{id}")))
            .header("x-wove-owner", "alice")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(got["data"]["messages"][0]["content"], "Hi again");
        assert!(got["data"]["messages"][0]["edited_at"].is_string());
    }

    #[tokio::test]
    async fn test_rename_validates_title() {
        let server = spawn_server(None).await;
        let session = create(&server, "alice").await;
        let id = session["id"].as_str().unwrap();

        let resp = server
            .client
            .patch(server.url(&format!("/api/v1/sessions/{id}")))
            .header("x-wove-owner", "alice")
            .json(&json!({"title": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = server
            .client
            .patch(server.url(&format!("/api/v1/sessions/{id}")))
            .header("x-wove-owner", "alice")
            .json(&json!({"title": "Wedding outfits"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_invalid_image_rejected() {
        let server = spawn_server(None).await;
        let session = create(&server, "alice").await;
        let id = session["id"].as_str().unwrap();

        let resp = server
            .client
            .post(server.url(&format!("/api/v1/sessions/{id}/messages")))
            .header("x-wove-owner", "alice")
            .json(&json!({"role": "user", "content": "look", "image": "ftp://example.com/a.png"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_invalid_uuid_is_bad_request() {
        let server = spawn_server(None).await;
        let resp = server
            .client
            .get(server.url("/api/v1/sessions/not-a-uuid"))
            .header("x-wove-owner", "alice")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}
