//! Session and streaming synchronization engine for Wove.
//!
//! This crate defines the "ports" (`ChatRepository`, `GenerationBackend`)
//! that the infrastructure layer implements, and the engine built on them.
//! It depends only on `wove-types` -- never on `wove-infra` or any
//! database/IO crate.

pub mod chat;
pub mod event;
pub mod llm;
