//! SyncCoordinator: the turn protocol.
//!
//! A turn moves through
//! `Idle -> UserMessageQueued -> SessionEnsured -> UserMessagePersisted ->
//! AssistantPlaceholderPersisted -> Streaming -> Settled -> Idle`.
//!
//! Local state is updated synchronously through the `StoreHandle`; the only
//! suspension points are gateway and backend calls. Every failure after a
//! turn is accepted resolves to a `TurnReport` rather than an error:
//! persistence failures degrade the turn, stream failures replace the reply
//! with the apology, and a failed promotion abandons it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;
use wove_types::attachment::Attachment;
use wove_types::chat::{APOLOGY, ChatMessage, LocalIdGenerator, MessageId, MessageRole, OwnerId, SessionId};
use wove_types::config::{ChatConfig, GenerationConfig};
use wove_types::error::{ChatError, RepositoryError, StoreError};
use wove_types::event::ChatEvent;
use wove_types::llm::{GenerationRequest, GenerationTurn};

pub use wove_types::event::TurnOutcome;

use super::ingest::ingest;
use super::lifecycle::SessionLifecycle;
use super::repository::ChatRepository;
use super::store::{EngineView, Selection, StoreHandle, store_error};
use crate::event::EventBus;
use crate::llm::BoxGenerationBackend;

/// How often accumulated content is written while streaming.
///
/// Every write carries the full accumulated content, so coalescing only
/// skips intermediate states; what is persisted is always a prefix of the
/// final reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Write at least this often while deltas are pending.
    pub interval: Duration,
    /// Write once this many characters are pending.
    pub max_chars: usize,
}

impl FlushPolicy {
    pub fn every_delta() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.flush_interval_ms),
            max_chars: config.flush_max_chars,
        }
    }

    fn is_every_delta(&self) -> bool {
        self.interval.is_zero() && self.max_chars == 0
    }
}

/// Model parameters sent with every generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: u32,
}

impl From<&GenerationConfig> for GenerationSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: Some(config.temperature),
            max_tokens: config.max_tokens,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

/// Result of the message append primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendedMessage {
    pub session_id: Uuid,
    /// Durable id if the gateway accepted the message, provisional otherwise.
    pub message_id: MessageId,
    pub persisted: bool,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    /// Durable id once promoted; the draft id if promotion failed.
    pub session_id: SessionId,
    pub user_message_id: Option<MessageId>,
    pub assistant_message_id: Option<MessageId>,
    pub outcome: TurnOutcome,
    /// Text to surface to the user, if any.
    pub display: Option<String>,
    /// A persistence write failed; local and durable views may differ.
    pub degraded: bool,
}

/// Ends the turn registration however the turn future finishes.
struct TurnGuard {
    store: StoreHandle,
    session: SessionId,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let session = self.session;
        self.store.update(|s| s.end_turn(session));
    }
}

/// Write-coalescing state for one streaming message.
struct PendingWrite {
    policy: FlushPolicy,
    content: Option<String>,
    pending_chars: usize,
    last_flush: Instant,
}

impl PendingWrite {
    fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            content: None,
            pending_chars: 0,
            last_flush: Instant::now(),
        }
    }

    fn record(&mut self, content: String, delta_chars: usize) {
        self.content = Some(content);
        self.pending_chars += delta_chars;
    }

    fn is_due(&self) -> bool {
        if self.content.is_none() {
            return false;
        }
        if self.policy.is_every_delta() {
            return true;
        }
        (self.policy.max_chars > 0 && self.pending_chars >= self.policy.max_chars)
            || (!self.policy.interval.is_zero() && self.last_flush.elapsed() >= self.policy.interval)
    }

    fn deadline(&self) -> Option<Instant> {
        if self.content.is_some() && !self.policy.interval.is_zero() {
            Some(self.last_flush + self.policy.interval)
        } else {
            None
        }
    }

    fn take(&mut self) -> Option<String> {
        self.pending_chars = 0;
        self.last_flush = Instant::now();
        self.content.take()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

enum StreamEnd {
    Completed,
    Failed(String),
    Cancelled,
}

/// Orchestrates the session store, draft promotion, the persistence
/// gateway, and the generation backend.
///
/// Generic over `ChatRepository` so wove-core never depends on wove-infra.
pub struct SyncCoordinator<R: ChatRepository> {
    repo: Arc<R>,
    backend: Arc<BoxGenerationBackend>,
    store: StoreHandle,
    lifecycle: SessionLifecycle<R>,
    owner: OwnerId,
    ids: Arc<LocalIdGenerator>,
    events: EventBus,
    settings: GenerationSettings,
    flush: FlushPolicy,
    /// FIFO lock per session serializing the append primitive, so messages
    /// reach the store and the gateway in submission order.
    append_locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl<R: ChatRepository> SyncCoordinator<R> {
    pub fn new(repo: Arc<R>, backend: BoxGenerationBackend, owner: OwnerId) -> Self {
        let store = StoreHandle::default();
        let ids = Arc::new(LocalIdGenerator::new());
        let events = EventBus::default();
        let lifecycle = SessionLifecycle::new(
            repo.clone(),
            store.clone(),
            owner.clone(),
            ids.clone(),
            events.clone(),
        );

        Self {
            repo,
            backend: Arc::new(backend),
            store,
            lifecycle,
            owner,
            ids,
            events,
            settings: GenerationSettings::default(),
            flush: FlushPolicy::every_delta(),
            append_locks: DashMap::new(),
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_flush_policy(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Reactive state for the presentation layer.
    pub fn subscribe(&self) -> watch::Receiver<EngineView> {
        self.store.subscribe()
    }

    pub fn view(&self) -> EngineView {
        self.store.view()
    }

    // --- Session management ---

    /// Load the owner's sessions and pick the initial active session.
    #[tracing::instrument(skip(self), fields(owner = %self.owner))]
    pub async fn load(&self, selection: Selection) -> Result<(), ChatError> {
        let sessions = self.repo.list_sessions(&self.owner).await?;
        let count = sessions.len();
        let greeting_id = self.ids.next_id();
        self.store.update(|s| s.load(sessions, selection, greeting_id));
        info!(sessions = count, "Sessions loaded");
        Ok(())
    }

    /// Start a draft session. Any turn still streaming elsewhere keeps going.
    pub fn start_new_chat(&self) -> SessionId {
        let id = self.lifecycle.start_new_chat();
        debug!(session = %id, "New chat started");
        id
    }

    pub fn switch_session(&self, session: SessionId) -> Result<(), ChatError> {
        self.store.update(|s| s.set_active(session)).map_err(store_error)
    }

    /// Delete a session everywhere and cancel its in-flight turn.
    ///
    /// A gateway rejection leaves the local store untouched. A draft whose
    /// promotion is still outstanding is dropped locally now and from the
    /// gateway once the create returns.
    pub async fn delete_session(&self, session: SessionId) -> Result<(), ChatError> {
        let lock_key = self.store.read(|s| s.origin(s.resolve(session)));
        let session = match self.store.read(|s| s.resolve(session)) {
            SessionId::Draft(_) => match self.discard_draft(session)? {
                Some(durable) => durable,
                None => {
                    self.append_locks.remove(&lock_key);
                    info!(session = %session, owner = %self.owner, "Draft session deleted");
                    return Ok(());
                }
            },
            durable => durable,
        };

        if let SessionId::Durable(id) = session {
            self.repo.delete_session(&id, &self.owner).await?;
        }

        if let Some(token) = self.store.read(|s| s.turn_token(session)) {
            token.cancel();
        }
        // The session may already be gone locally if it was only durable.
        let _ = self.store.update(|s| s.remove(session));
        self.append_locks.remove(&lock_key);
        info!(session = %session, owner = %self.owner, "Session deleted");
        Ok(())
    }

    /// Drop a draft and cancel its turn in one store update. Returns the
    /// durable id instead if the draft was promoted in the meantime.
    fn discard_draft(&self, draft: SessionId) -> Result<Option<SessionId>, ChatError> {
        self.store
            .update(|s| {
                let current = s.resolve(draft);
                if current.durable().is_some() {
                    return Ok(Some(current));
                }
                if let Some(token) = s.turn_token(current) {
                    token.cancel();
                }
                s.remove(current).map(|_| None)
            })
            .map_err(store_error)
    }

    /// Set an explicit title. A draft is promoted first so the title is
    /// durable.
    pub async fn rename_session(&self, session: SessionId, title: &str) -> Result<(), ChatError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ChatError::InvalidTitle);
        }

        let session = self.store.read(|s| s.resolve(session));
        let id = self.lifecycle.ensure_durable(session).await?;
        self.repo.rename_session(&id, title, &self.owner).await?;

        let _ = self.store.update(|s| s.rename(SessionId::Durable(id), title));
        info!(session_id = %id, "Session renamed");
        Ok(())
    }

    /// Out-of-band correction of a settled message.
    ///
    /// Rejected while the message is streaming. A gateway rejection is
    /// returned; other persistence failures are logged and the local edit
    /// stands.
    pub async fn edit_message(
        &self,
        session: SessionId,
        message_id: MessageId,
        content: &str,
    ) -> Result<(), ChatError> {
        let session = self.store.read(|s| s.resolve(session));
        self.store
            .update(|s| s.edit_message(session, message_id, content))
            .map_err(store_error)?;

        let (Some(session_id), Some(message)) = (session.durable(), message_id.durable()) else {
            debug!(session = %session, message = %message_id, "Edit kept local, message not persisted");
            return Ok(());
        };

        match self
            .repo
            .edit_message_content(&session_id, &message, content, &self.owner)
            .await
        {
            Ok(()) => Ok(()),
            Err(RepositoryError::NotFoundOrForbidden) => Err(ChatError::NotFoundOrForbidden),
            Err(e) => {
                self.degrade(session, &e);
                Ok(())
            }
        }
    }

    /// Cancel the in-flight turn of `session`. Returns whether one was
    /// running.
    pub fn cancel_turn(&self, session: SessionId) -> bool {
        match self.store.read(|s| s.turn_token(session)) {
            Some(token) => {
                token.cancel();
                info!(session = %session, "Turn cancellation requested");
                true
            }
            None => false,
        }
    }

    // --- Messages ---

    /// Append a message to a session: ensure it is durable, append locally
    /// (with the title rule), persist, then swap in the durable id.
    ///
    /// Calls on the same session are applied in the order they were made.
    /// A failed promotion returns `ChatError::SessionPromotion` with nothing
    /// appended; a failed persist leaves the message local with its
    /// provisional id.
    pub async fn append_message(
        &self,
        session: SessionId,
        role: MessageRole,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<AppendedMessage, ChatError> {
        let message = ChatMessage::provisional(self.ids.next_id(), role, content, attachment);
        self.append_inner(session, message, false).await
    }

    async fn append_inner(
        &self,
        session: SessionId,
        message: ChatMessage,
        stream: bool,
    ) -> Result<AppendedMessage, ChatError> {
        // Keyed by the draft id for promoted drafts, so callers holding
        // either id queue on the same lock.
        let key = self.store.read(|s| s.origin(s.resolve(session)));
        let lock = self.append_locks.entry(key).or_default().clone();
        let result = {
            let _held = lock.lock().await;
            self.append_locked(key, message, stream).await
        };
        // Drop the lock once nobody else holds or waits on it.
        self.append_locks
            .remove_if(&key, |_, held| Arc::ptr_eq(held, &lock) && Arc::strong_count(held) == 2);
        result
    }

    async fn append_locked(
        &self,
        session: SessionId,
        message: ChatMessage,
        stream: bool,
    ) -> Result<AppendedMessage, ChatError> {
        let session_id = self.lifecycle.ensure_durable(session).await?;
        let durable = SessionId::Durable(session_id);

        let local_id = message.id;
        self.store
            .update(|s| {
                if stream && s.streaming_message(durable).is_some() {
                    return Err(StoreError::AlreadyStreaming(durable));
                }
                s.append_message(durable, message.clone())?;
                if stream {
                    s.begin_streaming(durable, local_id)?;
                }
                Ok(())
            })
            .map_err(store_error)?;

        let persisted = match self.repo.append_message(&session_id, &message, &self.owner).await {
            Ok(persisted) => persisted,
            Err(e) => {
                self.degrade(durable, &e);
                return Ok(AppendedMessage {
                    session_id,
                    message_id: local_id,
                    persisted: false,
                });
            }
        };

        let Some(id) = persisted.id.durable() else {
            warn!(session_id = %session_id, "Gateway returned a message without a durable id");
            return Ok(AppendedMessage {
                session_id,
                message_id: local_id,
                persisted: false,
            });
        };
        if let Err(e) = self.store.update(|s| s.reconcile_message_id(durable, local_id, id)) {
            debug!(session_id = %session_id, error = %e, "Message left the store before reconciliation");
        }

        Ok(AppendedMessage {
            session_id,
            message_id: MessageId::Durable(id),
            persisted: true,
        })
    }

    // --- Turns ---

    /// Submit a turn to the active session, starting a draft if there is
    /// none.
    pub async fn submit_turn(&self, text: &str, image: Option<&str>) -> Result<TurnReport, ChatError> {
        let (text, attachment) = validate_submission(text, image)?;
        let session = match self.store.read(|s| s.active_id()) {
            Some(id) => id,
            None => self.start_new_chat(),
        };
        self.run_turn(session, text, attachment).await
    }

    /// Submit a turn to a specific session.
    pub async fn submit_turn_to(
        &self,
        session: SessionId,
        text: &str,
        image: Option<&str>,
    ) -> Result<TurnReport, ChatError> {
        let (text, attachment) = validate_submission(text, image)?;
        if self.store.read(|s| s.session(session).is_none()) {
            return Err(ChatError::UnknownSession(session));
        }
        self.run_turn(session, text, attachment).await
    }

    #[tracing::instrument(
        name = "submit_turn",
        skip(self, session, text, attachment),
        fields(owner = %self.owner, session = %session)
    )]
    async fn run_turn(
        &self,
        session: SessionId,
        text: String,
        attachment: Option<Attachment>,
    ) -> Result<TurnReport, ChatError> {
        let token = CancellationToken::new();
        if !self.store.update(|s| s.begin_turn(session, token.clone())) {
            return Err(ChatError::TurnInFlight(self.store.read(|s| s.resolve(session))));
        }
        let _guard = TurnGuard {
            store: self.store.clone(),
            session,
        };
        self.events.publish(ChatEvent::TurnStarted { session_id: session });

        // SessionEnsured + UserMessagePersisted
        let user = ChatMessage::provisional(self.ids.next_id(), MessageRole::User, text, attachment);
        let user = match self.append_inner(session, user, false).await {
            Ok(appended) => appended,
            Err(ChatError::SessionPromotion(reason)) => {
                let report = TurnReport {
                    session_id: session,
                    user_message_id: None,
                    assistant_message_id: None,
                    outcome: TurnOutcome::Abandoned,
                    display: Some(format!("Could not start the conversation: {reason}")),
                    degraded: false,
                };
                return Ok(self.settle(report));
            }
            Err(e) => return Ok(self.settle(interrupted(session, None, &e, false))),
        };
        let durable = SessionId::Durable(user.session_id);
        let mut degraded = !user.persisted;

        // Deleted or cancelled while the user message was in flight: stop
        // before the placeholder exists.
        if token.is_cancelled() {
            return Ok(self.settle(TurnReport {
                session_id: durable,
                user_message_id: Some(user.message_id),
                assistant_message_id: None,
                outcome: TurnOutcome::Cancelled,
                display: None,
                degraded,
            }));
        }

        // AssistantPlaceholderPersisted
        let history = self.history(durable, user.message_id);
        let placeholder = ChatMessage::provisional(self.ids.next_id(), MessageRole::Assistant, "", None);
        let assistant = match self.append_inner(durable, placeholder, true).await {
            Ok(appended) => appended,
            Err(e) => return Ok(self.settle(interrupted(durable, Some(user.message_id), &e, degraded))),
        };
        degraded |= !assistant.persisted;
        let target = assistant.message_id.durable();

        // Streaming
        let request = GenerationRequest {
            model: self.settings.model.clone(),
            turns: history,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };
        let span = info_span!(
            "gen_ai.stream",
            gen_ai.system = self.backend.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            gen_ai.request.stream = true,
        );
        let (end, stream_degraded) = self
            .stream_reply(durable, assistant.message_id, target, request, &token)
            .instrument(span)
            .await;
        degraded |= stream_degraded;

        // Settled
        let (outcome, display) = match end {
            StreamEnd::Completed => (TurnOutcome::Completed, None),
            StreamEnd::Cancelled => (TurnOutcome::Cancelled, None),
            StreamEnd::Failed(reason) => {
                warn!(session = %durable, %reason, "Generation failed, replying with apology");
                let _ = self
                    .store
                    .update(|s| s.replace_streaming_content(durable, assistant.message_id, APOLOGY));
                if let Some(target) = target
                    && !self.persist_content(user.session_id, target, APOLOGY).await
                {
                    degraded = true;
                }
                (TurnOutcome::Failed, Some(APOLOGY.to_string()))
            }
        };
        self.store
            .update(|s| s.finish_streaming(durable, assistant.message_id));

        Ok(self.settle(TurnReport {
            session_id: durable,
            user_message_id: Some(user.message_id),
            assistant_message_id: Some(assistant.message_id),
            outcome,
            display,
            degraded,
        }))
    }

    /// Open the backend stream and fold deltas into the store and gateway
    /// until it ends, fails, or the turn is cancelled.
    ///
    /// Returns how the stream ended and whether any content write failed.
    async fn stream_reply(
        &self,
        session: SessionId,
        message_id: MessageId,
        target: Option<Uuid>,
        request: GenerationRequest,
        token: &CancellationToken,
    ) -> (StreamEnd, bool) {
        let Some(session_id) = session.durable() else {
            return (StreamEnd::Failed("session is not durable".to_string()), false);
        };

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return (StreamEnd::Cancelled, false),
            opened = self.backend.open_stream(request) => opened,
        };
        let source = match opened {
            Ok(source) => source,
            Err(e) => return (StreamEnd::Failed(e.to_string()), false),
        };

        let deltas = ingest(source);
        futures_util::pin_mut!(deltas);
        let mut pending = PendingWrite::new(self.flush);
        let mut degraded = false;

        let end = loop {
            let deadline = pending.deadline();
            tokio::select! {
                biased;
                _ = token.cancelled() => break StreamEnd::Cancelled,
                _ = sleep_until_opt(deadline) => {}
                next = deltas.next() => match next {
                    Some(Ok(delta)) => {
                        let chars = delta.text.chars().count();
                        let content = match self
                            .store
                            .update(|s| s.append_delta(session, message_id, &delta.text))
                        {
                            Ok(content) => content,
                            Err(e) => {
                                debug!(session = %session, error = %e, "Streaming target is gone");
                                break StreamEnd::Cancelled;
                            }
                        };
                        self.events.publish(ChatEvent::AssistantDelta {
                            session_id: session,
                            message_id,
                            index: delta.index,
                            text: delta.text,
                        });
                        pending.record(content, chars);
                    }
                    Some(Err(e)) => break StreamEnd::Failed(e.to_string()),
                    None => break StreamEnd::Completed,
                },
            }

            if pending.is_due()
                && let Some(content) = pending.take()
                && let Some(target) = target
            {
                debug!(session = %session, chars = content.len(), "Flushing streamed content");
                degraded |= !self.persist_content(session_id, target, &content).await;
            }
        };

        // Completed and Cancelled keep what was streamed; a failure is
        // overwritten with the apology by the caller.
        if !matches!(end, StreamEnd::Failed(_))
            && let Some(content) = pending.take()
            && let Some(target) = target
        {
            degraded |= !self.persist_content(session_id, target, &content).await;
        }

        (end, degraded)
    }

    async fn persist_content(&self, session_id: Uuid, message_id: Uuid, content: &str) -> bool {
        match self
            .repo
            .update_message_content(&session_id, &message_id, content, &self.owner)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.degrade(SessionId::Durable(session_id), &e);
                false
            }
        }
    }

    fn history(&self, session: SessionId, upto: MessageId) -> Vec<GenerationTurn> {
        self.store.read(|s| {
            let Some(session) = s.session(session) else {
                return Vec::new();
            };
            let mut turns = Vec::with_capacity(session.messages.len());
            for message in &session.messages {
                turns.push(GenerationTurn::from(message));
                if message.id == upto {
                    break;
                }
            }
            turns
        })
    }

    fn degrade(&self, session: SessionId, error: &RepositoryError) {
        warn!(session = %session, error = %error, "Persistence write failed, continuing degraded");
        self.events.publish(ChatEvent::PersistenceDegraded {
            session_id: session,
            reason: error.to_string(),
        });
    }

    fn settle(&self, report: TurnReport) -> TurnReport {
        info!(
            session = %report.session_id,
            outcome = %report.outcome,
            degraded = report.degraded,
            "Turn settled"
        );
        self.events.publish(ChatEvent::TurnSettled {
            session_id: report.session_id,
            outcome: report.outcome,
            display: report.display.clone(),
        });
        report
    }
}

/// Report for a turn that stopped before streaming because its session went
/// away or the store refused the next step.
fn interrupted(
    session: SessionId,
    user_message_id: Option<MessageId>,
    error: &ChatError,
    degraded: bool,
) -> TurnReport {
    let (outcome, display) = match error {
        ChatError::UnknownSession(_) => (TurnOutcome::Cancelled, None),
        other => (TurnOutcome::Abandoned, Some(format!("Could not continue the conversation: {other}"))),
    };
    if outcome == TurnOutcome::Abandoned {
        warn!(session = %session, error = %error, "Turn abandoned before streaming");
    } else {
        debug!(session = %session, "Turn stopped before streaming");
    }
    TurnReport {
        session_id: session,
        user_message_id,
        assistant_message_id: None,
        outcome,
        display,
        degraded,
    }
}

fn validate_submission(text: &str, image: Option<&str>) -> Result<(String, Option<Attachment>), ChatError> {
    let text = text.trim();
    let image = image.map(str::trim).filter(|i| !i.is_empty());
    if text.is_empty() && image.is_none() {
        return Err(ChatError::EmptySubmission);
    }
    let attachment = image.map(Attachment::parse).transpose()?;
    Ok((text.to_string(), attachment))
}
