//! In-memory authoritative view of the viewer's sessions.
//!
//! `SessionStore` holds every session of the current viewer in list order,
//! the active-session pointer, which assistant message (if any) is streaming
//! per session, and which sessions have a turn in flight. All mutation is
//! synchronous; the async engine wraps it in a `StoreHandle` that publishes a
//! fresh `EngineView` to readers after every change.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wove_types::chat::{ChatMessage, ChatSession, MessageId, MessageRole, SessionId, SessionSummary};
use wove_types::error::{ChatError, StoreError};

use super::title::{derive_title, is_first_user_message};

/// Which session becomes active after loading the durable list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The most recently updated session, or none if the list is empty.
    Latest,
    /// A fresh draft placed in front of the durable list.
    NewChat,
    /// A specific session, falling back to the most recent one.
    Session(Uuid),
}

/// Snapshot published to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineView {
    pub active: Option<ChatSession>,
    pub sessions: Vec<SessionSummary>,
    /// Whether the active session has a turn in flight.
    pub in_flight: bool,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Vec<ChatSession>,
    active: Option<SessionId>,
    streaming: HashMap<SessionId, MessageId>,
    in_flight: HashMap<SessionId, CancellationToken>,
    next_epoch: u64,
    promotions: HashMap<u64, Uuid>,
    /// Drafts whose `create_session` call is outstanding.
    promoting: HashSet<u64>,
    /// Drafts deleted while their promotion was outstanding.
    deleted_drafts: HashSet<u64>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the session list with a freshly loaded durable list.
    pub fn load(&mut self, sessions: Vec<ChatSession>, selection: Selection, greeting_id: u64) {
        self.sessions = sessions;
        self.streaming.clear();
        self.active = self.sessions.first().map(|s| s.id);

        match selection {
            Selection::Latest => {}
            Selection::NewChat => {
                self.start_draft(greeting_id);
            }
            Selection::Session(id) => {
                if self.index_of(SessionId::Durable(id)).is_some() {
                    self.active = Some(SessionId::Durable(id));
                }
            }
        }
    }

    /// Put a fresh draft in front of the list and make it active.
    ///
    /// Any previous draft is discarded, so the store never holds two.
    pub fn start_draft(&mut self, greeting_id: u64) -> SessionId {
        self.sessions.retain(|s| !s.is_draft());
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let draft = ChatSession::draft(epoch, greeting_id);
        let id = draft.id;
        self.sessions.insert(0, draft);
        self.active = Some(id);
        id
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn session(&self, id: SessionId) -> Option<&ChatSession> {
        let id = self.resolve(id);
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active
    }

    pub fn active(&self) -> Option<&ChatSession> {
        self.active.and_then(|id| self.session(id))
    }

    pub fn draft_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_draft()).count()
    }

    /// Map a draft id to its durable id once it has been promoted.
    pub fn resolve(&self, id: SessionId) -> SessionId {
        match id {
            SessionId::Draft(epoch) => self
                .promotions
                .get(&epoch)
                .map(|durable| SessionId::Durable(*durable))
                .unwrap_or(id),
            durable => durable,
        }
    }

    pub fn set_active(&mut self, id: SessionId) -> Result<(), StoreError> {
        let id = self.resolve(id);
        self.index_of(id).ok_or(StoreError::UnknownSession(id))?;
        self.active = Some(id);
        Ok(())
    }

    /// The key that identifies `session` before and after promotion: the
    /// draft id for promoted drafts, the durable id otherwise.
    pub fn origin(&self, session: SessionId) -> SessionId {
        match session {
            SessionId::Durable(id) => self
                .promotions
                .iter()
                .find(|(_, durable)| **durable == id)
                .map(|(epoch, _)| SessionId::Draft(*epoch))
                .unwrap_or(session),
            draft => draft,
        }
    }

    /// Mark draft `epoch` as being promoted.
    ///
    /// Returns the durable id if the promotion already happened, and fails if
    /// the draft is no longer in the store.
    pub fn begin_promotion(&mut self, epoch: u64) -> Result<Option<Uuid>, StoreError> {
        if let Some(id) = self.promotions.get(&epoch) {
            return Ok(Some(*id));
        }
        let draft_id = SessionId::Draft(epoch);
        self.index_of(draft_id).ok_or(StoreError::UnknownSession(draft_id))?;
        self.promoting.insert(epoch);
        Ok(None)
    }

    /// Forget an outstanding promotion whose create call failed.
    pub fn abort_promotion(&mut self, epoch: u64) {
        self.promoting.remove(&epoch);
        self.deleted_drafts.remove(&epoch);
    }

    /// Replace draft `epoch` in place with the durable session the gateway
    /// created for it.
    ///
    /// The server greeting replaces the local one; any other local messages
    /// are carried over after it. If the draft was replaced by a newer one
    /// while the create was outstanding, the durable session is put at the
    /// front of the list. If it was deleted, nothing is inserted and
    /// `StoreError::DraftDeleted` tells the caller to drop the durable copy.
    /// Promoting the same epoch twice returns the first durable id.
    pub fn promote_draft(&mut self, epoch: u64, durable: ChatSession) -> Result<Uuid, StoreError> {
        let Some(id) = durable.id.durable() else {
            return Err(StoreError::UnknownSession(durable.id));
        };
        if let Some(existing) = self.promotions.get(&epoch) {
            return Ok(*existing);
        }

        let draft_id = SessionId::Draft(epoch);
        self.promoting.remove(&epoch);
        if self.deleted_drafts.remove(&epoch) {
            return Err(StoreError::DraftDeleted(draft_id));
        }
        let new_id = SessionId::Durable(id);

        match self.index_of(draft_id) {
            Some(pos) => {
                let draft = std::mem::replace(&mut self.sessions[pos], durable);
                self.sessions[pos]
                    .messages
                    .extend(draft.messages.into_iter().skip(1));
            }
            None => self.sessions.insert(0, durable),
        }

        if self.active == Some(draft_id) {
            self.active = Some(new_id);
        }
        if let Some(message) = self.streaming.remove(&draft_id) {
            self.streaming.insert(new_id, message);
        }
        if let Some(token) = self.in_flight.remove(&draft_id) {
            self.in_flight.insert(new_id, token);
        }
        self.promotions.insert(epoch, id);
        Ok(id)
    }

    pub fn promotion(&self, epoch: u64) -> Option<Uuid> {
        self.promotions.get(&epoch).copied()
    }

    /// Append a message to a durable session.
    ///
    /// Applies the first-user-message title rule and bumps `updated_at`.
    /// Drafts must be promoted first.
    pub fn append_message(&mut self, session: SessionId, message: ChatMessage) -> Result<(), StoreError> {
        let session = self.session_mut_durable(session)?;

        let first = is_first_user_message(session.messages.len(), message.role);
        session.title = derive_title(&session.title, first, &message.content);
        session.messages.push(message);
        session.updated_at = Utc::now();
        Ok(())
    }

    /// Rewrite a provisional message id to the durable one, in place.
    pub fn reconcile_message_id(
        &mut self,
        session: SessionId,
        local: MessageId,
        durable: Uuid,
    ) -> Result<(), StoreError> {
        let session_id = self.resolve(session);
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(StoreError::UnknownSession(session_id))?;
        let message = session.message_mut(&local).ok_or(StoreError::UnknownMessage {
            session: session_id,
            message: local,
        })?;
        message.id.promote(durable)?;

        if self.streaming.get(&session_id) == Some(&local) {
            self.streaming.insert(session_id, MessageId::Durable(durable));
        }
        Ok(())
    }

    /// Mark an assistant message as the one receiving deltas.
    pub fn begin_streaming(&mut self, session: SessionId, message_id: MessageId) -> Result<(), StoreError> {
        let session_id = self.resolve(session);
        if self.streaming.contains_key(&session_id) {
            return Err(StoreError::AlreadyStreaming(session_id));
        }
        let session = self
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .ok_or(StoreError::UnknownSession(session_id))?;
        let message = session.message(&message_id).ok_or(StoreError::UnknownMessage {
            session: session_id,
            message: message_id,
        })?;
        if message.role != MessageRole::Assistant {
            return Err(StoreError::NotAssistant);
        }

        self.streaming.insert(session_id, message_id);
        Ok(())
    }

    /// Append a delta to the streaming message and return the accumulated
    /// content.
    pub fn append_delta(
        &mut self,
        session: SessionId,
        message_id: MessageId,
        delta: &str,
    ) -> Result<String, StoreError> {
        let message = self.streaming_target(session, message_id)?;
        message.content.push_str(delta);
        let content = message.content.clone();
        self.touch(session);
        Ok(content)
    }

    /// Replace the whole content of the streaming message.
    pub fn replace_streaming_content(
        &mut self,
        session: SessionId,
        message_id: MessageId,
        content: &str,
    ) -> Result<(), StoreError> {
        let message = self.streaming_target(session, message_id)?;
        message.content = content.to_string();
        self.touch(session);
        Ok(())
    }

    pub fn finish_streaming(&mut self, session: SessionId, message_id: MessageId) {
        let session_id = self.resolve(session);
        if self.streaming.get(&session_id) == Some(&message_id) {
            self.streaming.remove(&session_id);
        }
    }

    pub fn streaming_message(&self, session: SessionId) -> Option<MessageId> {
        self.streaming.get(&self.resolve(session)).copied()
    }

    /// Out-of-band correction of a settled message.
    pub fn edit_message(
        &mut self,
        session: SessionId,
        message_id: MessageId,
        content: &str,
    ) -> Result<(), StoreError> {
        let session_id = self.resolve(session);
        if self.streaming.get(&session_id) == Some(&message_id) {
            return Err(StoreError::StillStreaming(message_id));
        }
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(StoreError::UnknownSession(session_id))?;
        let now = Utc::now();
        let message = session.message_mut(&message_id).ok_or(StoreError::UnknownMessage {
            session: session_id,
            message: message_id,
        })?;
        message.content = content.to_string();
        message.edited_at = Some(now);
        session.updated_at = now;
        Ok(())
    }

    pub fn rename(&mut self, session: SessionId, title: &str) -> Result<(), StoreError> {
        let session_id = self.resolve(session);
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(StoreError::UnknownSession(session_id))?;
        session.title = title.to_string();
        Ok(())
    }

    /// Remove a session. If it was active, the first remaining session
    /// becomes active (or none).
    ///
    /// A draft removed while its promotion is outstanding stays deleted:
    /// the later `promote_draft` for it fails instead of reinserting it.
    pub fn remove(&mut self, session: SessionId) -> Result<ChatSession, StoreError> {
        let session_id = self.resolve(session);
        let pos = self
            .index_of(session_id)
            .ok_or(StoreError::UnknownSession(session_id))?;
        let removed = self.sessions.remove(pos);
        self.streaming.remove(&session_id);
        self.in_flight.remove(&session_id);
        match session_id {
            SessionId::Draft(epoch) => {
                if self.promoting.contains(&epoch) {
                    self.deleted_drafts.insert(epoch);
                }
            }
            SessionId::Durable(id) => self.promotions.retain(|_, durable| *durable != id),
        }

        if self.active == Some(session_id) {
            self.active = self.sessions.first().map(|s| s.id);
        }
        Ok(removed)
    }

    // --- Turn gating ---

    /// Register a turn for `session`. Returns false if one is already in
    /// flight there.
    pub fn begin_turn(&mut self, session: SessionId, token: CancellationToken) -> bool {
        let session_id = self.resolve(session);
        if self.in_flight.contains_key(&session_id) {
            return false;
        }
        self.in_flight.insert(session_id, token);
        true
    }

    pub fn end_turn(&mut self, session: SessionId) {
        let session_id = self.resolve(session);
        self.in_flight.remove(&session_id);
    }

    pub fn turn_token(&self, session: SessionId) -> Option<CancellationToken> {
        self.in_flight.get(&self.resolve(session)).cloned()
    }

    pub fn is_in_flight(&self, session: SessionId) -> bool {
        self.in_flight.contains_key(&self.resolve(session))
    }

    /// Build the snapshot published to readers.
    pub fn view(&self) -> EngineView {
        let active = self.active().cloned();
        EngineView {
            in_flight: self.active.is_some_and(|id| self.is_in_flight(id)),
            active,
            sessions: self.sessions.iter().map(SessionSummary::from).collect(),
        }
    }

    fn index_of(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }

    fn session_mut_durable(&mut self, session: SessionId) -> Result<&mut ChatSession, StoreError> {
        let session_id = self.resolve(session);
        if session_id.is_draft() {
            return Err(StoreError::DraftNotPromoted(session_id));
        }
        self.sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(StoreError::UnknownSession(session_id))
    }

    fn streaming_target(
        &mut self,
        session: SessionId,
        message_id: MessageId,
    ) -> Result<&mut ChatMessage, StoreError> {
        let session_id = self.resolve(session);
        if self.streaming.get(&session_id) != Some(&message_id) {
            return Err(StoreError::NotStreaming(message_id));
        }
        self.sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .and_then(|s| s.message_mut(&message_id))
            .ok_or(StoreError::UnknownMessage {
                session: session_id,
                message: message_id,
            })
    }

    fn touch(&mut self, session: SessionId) {
        let session_id = self.resolve(session);
        if let Some(session) = self.sessions.iter_mut().find(|s| s.id == session_id) {
            session.updated_at = Utc::now();
        }
    }
}

/// Surface a missing session as `ChatError::UnknownSession`.
pub(crate) fn store_error(err: StoreError) -> ChatError {
    match err {
        StoreError::UnknownSession(id) => ChatError::UnknownSession(id),
        other => ChatError::Store(other),
    }
}

/// Shared, single-writer handle to a `SessionStore`.
///
/// Mutations go through [`StoreHandle::update`], which holds the lock for the
/// duration of the closure and then publishes the new view. Readers either
/// call [`StoreHandle::read`] or subscribe to the view channel.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<SessionStore>>,
    view_tx: Arc<watch::Sender<EngineView>>,
}

impl StoreHandle {
    pub fn new(store: SessionStore) -> Self {
        let (view_tx, _) = watch::channel(store.view());
        Self {
            inner: Arc::new(Mutex::new(store)),
            view_tx: Arc::new(view_tx),
        }
    }

    pub fn read<T>(&self, f: impl FnOnce(&SessionStore) -> T) -> T {
        let store = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&store)
    }

    pub fn update<T>(&self, f: impl FnOnce(&mut SessionStore) -> T) -> T {
        let mut store = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut store);
        self.view_tx.send_replace(store.view());
        result
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> EngineView {
        self.view_tx.borrow().clone()
    }
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new(SessionStore::new())
    }
}
