//! Draft session promotion.
//!
//! A draft lives only in the `SessionStore` until the first durable write
//! needs a real session id. `SessionLifecycle::ensure_durable` performs that
//! promotion: one `create_session` call per draft, however many callers are
//! waiting on it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;
use wove_types::chat::{LocalIdGenerator, OwnerId, SessionId};
use wove_types::error::{ChatError, StoreError};
use wove_types::event::ChatEvent;

use super::repository::ChatRepository;
use super::store::{StoreHandle, store_error};
use crate::event::EventBus;

pub struct SessionLifecycle<R: ChatRepository> {
    repo: Arc<R>,
    store: StoreHandle,
    owner: OwnerId,
    ids: Arc<LocalIdGenerator>,
    events: EventBus,
    /// One cell per draft epoch; concurrent callers await the same init.
    promotions: DashMap<u64, Arc<OnceCell<Uuid>>>,
}

impl<R: ChatRepository> SessionLifecycle<R> {
    pub fn new(
        repo: Arc<R>,
        store: StoreHandle,
        owner: OwnerId,
        ids: Arc<LocalIdGenerator>,
        events: EventBus,
    ) -> Self {
        Self {
            repo,
            store,
            owner,
            ids,
            events,
            promotions: DashMap::new(),
        }
    }

    /// Start a fresh draft and make it active.
    pub fn start_new_chat(&self) -> SessionId {
        let greeting_id = self.ids.next_id();
        self.store.update(|s| s.start_draft(greeting_id))
    }

    /// Return the durable id for `session`, promoting a draft if needed.
    ///
    /// On failure the draft is left untouched and the error is
    /// `ChatError::SessionPromotion`; a later call retries the create. A
    /// draft deleted before or during its promotion yields
    /// `ChatError::UnknownSession` and leaves nothing behind in the gateway.
    #[tracing::instrument(name = "ensure_durable", skip(self, session), fields(owner = %self.owner, session = %session))]
    pub async fn ensure_durable(&self, session: SessionId) -> Result<Uuid, ChatError> {
        let epoch = match session {
            SessionId::Durable(id) => return Ok(id),
            SessionId::Draft(epoch) => epoch,
        };
        if let Some(id) = self.store.read(|s| s.promotion(epoch)) {
            return Ok(id);
        }

        let cell = self.promotions.entry(epoch).or_default().clone();
        let result = cell.get_or_try_init(|| self.promote(epoch)).await.copied();
        // Once settled either way the store answers later lookups. A failed
        // create keeps its cell so waiters retry through it.
        if !matches!(result, Err(ChatError::SessionPromotion(_))) {
            self.promotions.remove(&epoch);
        }
        result
    }

    async fn promote(&self, epoch: u64) -> Result<Uuid, ChatError> {
        // A caller that raced past the first check may land here after the
        // promotion finished.
        if let Some(id) = self.store.update(|s| s.begin_promotion(epoch)).map_err(store_error)? {
            return Ok(id);
        }

        let created = match self.repo.create_session(&self.owner).await {
            Ok(created) => created,
            Err(e) => {
                self.store.update(|s| s.abort_promotion(epoch));
                warn!(epoch, error = %e, "Session promotion failed, draft kept");
                return Err(ChatError::SessionPromotion(e.to_string()));
            }
        };
        let created_id = created.id;

        let id = match self.store.update(|s| s.promote_draft(epoch, created)) {
            Ok(id) => id,
            Err(StoreError::DraftDeleted(draft)) => {
                self.discard_created(created_id).await;
                return Err(ChatError::UnknownSession(draft));
            }
            Err(e) => return Err(e.into()),
        };
        info!(session_id = %id, epoch, "Draft session promoted");
        self.events.publish(ChatEvent::SessionPromoted {
            draft_epoch: epoch,
            session_id: id,
        });
        Ok(id)
    }

    /// Delete the durable session created for a draft that was deleted while
    /// the create was outstanding.
    async fn discard_created(&self, created: SessionId) {
        let Some(id) = created.durable() else {
            return;
        };
        match self.repo.delete_session(&id, &self.owner).await {
            Ok(()) => info!(session_id = %id, "Dropped session created for a deleted draft"),
            Err(e) => warn!(session_id = %id, error = %e, "Could not drop session created for a deleted draft"),
        }
    }
}
