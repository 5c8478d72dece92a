//! HTTP layer for Wove.
//!
//! Axum server with the generation proxy route at `/api/chat`, the session
//! persistence API under `/api/v1/`, envelope responses, and CORS support.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;
