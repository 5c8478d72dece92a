//! Shared domain types for Wove.
//!
//! This crate contains the core domain types used across the engine:
//! sessions, messages, tagged identifiers, attachments, generation requests,
//! engine events, configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror, base64.

pub mod attachment;
pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod llm;
