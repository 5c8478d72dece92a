//! Chat sessions: persistence port, local store, and the turn protocol.
//!
//! - `repository`: the `ChatRepository` persistence port
//! - `title`: the first-message title rule
//! - `store`: the in-memory `SessionStore` and its shared handle
//! - `ingest`: byte stream to content-delta conversion
//! - `lifecycle`: draft promotion
//! - `coordinator`: `SyncCoordinator`, which drives turns end to end

pub mod coordinator;
pub mod ingest;
pub mod lifecycle;
pub mod repository;
pub mod store;
pub mod title;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{AppendedMessage, FlushPolicy, GenerationSettings, SyncCoordinator, TurnOutcome, TurnReport};
pub use store::{EngineView, Selection, SessionStore, StoreHandle};
