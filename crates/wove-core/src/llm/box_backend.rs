//! BoxGenerationBackend -- object-safe dynamic dispatch wrapper for GenerationBackend.
//!
//! 1. `GenerationBackendDyn` is the object-safe trait with boxed futures
//! 2. Blanket impl of `GenerationBackendDyn` for all `T: GenerationBackend`
//! 3. `BoxGenerationBackend` wraps `Box<dyn GenerationBackendDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use wove_types::llm::{GenerationError, GenerationRequest};

use super::backend::{ByteStream, GenerationBackend};

/// Object-safe version of [`GenerationBackend`] with boxed futures.
pub trait GenerationBackendDyn: Send + Sync {
    fn name(&self) -> &str;

    fn open_stream_boxed(
        &self,
        request: GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, GenerationError>> + Send + '_>>;
}

impl<T: GenerationBackend> GenerationBackendDyn for T {
    fn name(&self) -> &str {
        GenerationBackend::name(self)
    }

    fn open_stream_boxed(
        &self,
        request: GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, GenerationError>> + Send + '_>> {
        Box::pin(self.open_stream(request))
    }
}

/// Type-erased generation backend for runtime backend selection.
///
/// `GenerationBackend` uses RPITIT and cannot be a trait object directly;
/// the config picks the concrete backend at startup and the engine holds
/// this wrapper.
pub struct BoxGenerationBackend {
    inner: Box<dyn GenerationBackendDyn + Send + Sync>,
}

impl BoxGenerationBackend {
    pub fn new<T: GenerationBackend + 'static>(backend: T) -> Self {
        Self {
            inner: Box::new(backend),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn open_stream(&self, request: GenerationRequest) -> Result<ByteStream, GenerationError> {
        self.inner.open_stream_boxed(request).await
    }
}

impl std::fmt::Debug for BoxGenerationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxGenerationBackend")
            .field("name", &self.name())
            .finish()
    }
}
