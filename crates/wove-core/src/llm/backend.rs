//! GenerationBackend trait definition.
//!
//! A backend accepts the full role-tagged conversation and returns an open
//! stream of raw response bytes. Opening the stream is fallible on its own:
//! a non-2xx status or a malformed initial response is reported before any
//! byte is read. Errors after that arrive as stream items.

use std::pin::Pin;

use futures_util::Stream;

use wove_types::llm::{GenerationError, GenerationRequest};

/// Raw response body as it arrives from the backend.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, GenerationError>> + Send + 'static>>;

/// Trait for generation backends (OpenAI-compatible API, text proxy, ...).
///
/// Implementations live in wove-infra.
pub trait GenerationBackend: Send + Sync {
    /// Human-readable backend name (e.g., "openai_compatible", "http").
    fn name(&self) -> &str;

    /// Send the request and return the open response stream.
    fn open_stream(
        &self,
        request: GenerationRequest,
    ) -> impl std::future::Future<Output = Result<ByteStream, GenerationError>> + Send;
}
