//! Test doubles for driving the engine without a database or network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures_util::{StreamExt, stream};
use tokio::sync::Notify;
use uuid::Uuid;
use wove_types::chat::{
    ChatMessage, ChatSession, DEFAULT_SESSION_TITLE, GREETING, MessageId, MessageRole, OwnerId, SessionId,
};
use wove_types::error::RepositoryError;
use wove_types::llm::{GenerationError, GenerationRequest};

use super::repository::ChatRepository;
use super::title::{derive_title, is_first_user_message};
use crate::llm::{ByteStream, GenerationBackend};

#[derive(Default)]
struct Records {
    sessions: Vec<(OwnerId, ChatSession)>,
    content_updates: Vec<(Uuid, String)>,
}

/// `ChatRepository` backed by a vector, with switches for failure injection
/// and one-shot gates that hold the next `create_session` or
/// `append_message` until released.
#[derive(Default)]
pub struct InMemoryChatRepository {
    records: Mutex<Records>,
    create_calls: AtomicUsize,
    fail_creates: AtomicBool,
    fail_appends: AtomicBool,
    fail_updates: AtomicBool,
    create_gate: Mutex<Option<Arc<Notify>>>,
    append_calls: AtomicUsize,
    append_gate: Mutex<Option<Arc<Notify>>>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Hold the next `create_session` until the returned `Notify` fires.
    pub fn gate_creates(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.create_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Hold the next `append_message` until the returned `Notify` fires.
    pub fn gate_appends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.append_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Every `update_message_content` call, in order.
    pub fn content_updates(&self) -> Vec<(Uuid, String)> {
        self.records.lock().unwrap().content_updates.clone()
    }

    pub fn stored_session(&self, id: Uuid) -> Option<ChatSession> {
        self.records
            .lock()
            .unwrap()
            .sessions
            .iter()
            .find(|(_, s)| s.id == SessionId::Durable(id))
            .map(|(_, s)| s.clone())
    }

    pub fn session_count(&self) -> usize {
        self.records.lock().unwrap().sessions.len()
    }

    fn with_owned<T>(
        &self,
        session_id: &Uuid,
        owner: &OwnerId,
        f: impl FnOnce(&mut ChatSession) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut records = self.records.lock().unwrap();
        let (_, session) = records
            .sessions
            .iter_mut()
            .find(|(o, s)| o == owner && s.id == SessionId::Durable(*session_id))
            .ok_or(RepositoryError::NotFoundOrForbidden)?;
        f(session)
    }
}

fn durable_message(role: MessageRole, content: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId::Durable(Uuid::now_v7()),
        role,
        content: content.to_string(),
        attachment: None,
        created_at: Utc::now(),
        edited_at: None,
    }
}

impl ChatRepository for InMemoryChatRepository {
    async fn list_sessions(&self, owner: &OwnerId) -> Result<Vec<ChatSession>, RepositoryError> {
        let records = self.records.lock().unwrap();
        let mut sessions: Vec<ChatSession> = records
            .sessions
            .iter()
            .filter(|(o, _)| o == owner)
            .map(|(_, s)| s.clone())
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn get_session(&self, session_id: &Uuid, owner: &OwnerId) -> Result<ChatSession, RepositoryError> {
        self.with_owned(session_id, owner, |s| Ok(s.clone()))
    }

    async fn create_session(&self, owner: &OwnerId) -> Result<ChatSession, RepositoryError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.create_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }

        let session = ChatSession {
            id: SessionId::Durable(Uuid::now_v7()),
            title: DEFAULT_SESSION_TITLE.to_string(),
            updated_at: Utc::now(),
            messages: vec![durable_message(MessageRole::Assistant, GREETING)],
        };
        self.records
            .lock()
            .unwrap()
            .sessions
            .push((owner.clone(), session.clone()));
        Ok(session)
    }

    async fn delete_session(&self, session_id: &Uuid, owner: &OwnerId) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().unwrap();
        let pos = records
            .sessions
            .iter()
            .position(|(o, s)| o == owner && s.id == SessionId::Durable(*session_id))
            .ok_or(RepositoryError::NotFoundOrForbidden)?;
        records.sessions.remove(pos);
        Ok(())
    }

    async fn append_message(
        &self,
        session_id: &Uuid,
        message: &ChatMessage,
        owner: &OwnerId,
    ) -> Result<ChatMessage, RepositoryError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.append_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("append failed".to_string()));
        }
        self.with_owned(session_id, owner, |session| {
            let mut persisted = message.clone();
            persisted.id = MessageId::Durable(Uuid::now_v7());

            let first = is_first_user_message(session.messages.len(), message.role);
            session.title = derive_title(&session.title, first, &message.content);
            session.messages.push(persisted.clone());
            session.updated_at = Utc::now();
            Ok(persisted)
        })
    }

    async fn update_message_content(
        &self,
        session_id: &Uuid,
        message_id: &Uuid,
        content: &str,
        owner: &OwnerId,
    ) -> Result<(), RepositoryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("update failed".to_string()));
        }
        self.with_owned(session_id, owner, |session| {
            let message = session
                .message_mut(&MessageId::Durable(*message_id))
                .ok_or(RepositoryError::NotFoundOrForbidden)?;
            message.content = content.to_string();
            session.updated_at = Utc::now();
            Ok(())
        })?;
        self.records
            .lock()
            .unwrap()
            .content_updates
            .push((*message_id, content.to_string()));
        Ok(())
    }

    async fn edit_message_content(
        &self,
        session_id: &Uuid,
        message_id: &Uuid,
        content: &str,
        owner: &OwnerId,
    ) -> Result<(), RepositoryError> {
        self.with_owned(session_id, owner, |session| {
            let message = session
                .message_mut(&MessageId::Durable(*message_id))
                .ok_or(RepositoryError::NotFoundOrForbidden)?;
            message.content = content.to_string();
            message.edited_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn rename_session(&self, session_id: &Uuid, title: &str, owner: &OwnerId) -> Result<(), RepositoryError> {
        self.with_owned(session_id, owner, |session| {
            session.title = title.to_string();
            Ok(())
        })
    }
}

/// What a single `open_stream` call should do.
pub enum Script {
    /// Open successfully and deliver these items, then end.
    Chunks(Vec<Result<Vec<u8>, GenerationError>>),
    /// Fail before any byte is read (non-2xx, malformed response).
    FailOpen(GenerationError),
    /// Deliver these chunks, then never end.
    Hang(Vec<Vec<u8>>),
}

impl Script {
    pub fn text(parts: &[&str]) -> Self {
        Script::Chunks(parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect())
    }
}

/// `GenerationBackend` that plays back queued scripts and records requests.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_stream(&self, request: GenerationRequest) -> Result<ByteStream, GenerationError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::text(&["ok"]));

        match script {
            Script::Chunks(items) => Ok(Box::pin(stream::iter(items))),
            Script::FailOpen(err) => Err(err),
            Script::Hang(chunks) => Ok(Box::pin(
                stream::iter(chunks.into_iter().map(Ok::<Vec<u8>, GenerationError>)).chain(stream::pending()),
            )),
        }
    }
}
