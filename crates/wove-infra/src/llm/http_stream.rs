//! Generation backend that streams from a `/api/chat` proxy route.
//!
//! Posts a `ProxyChatRequest` and exposes the `text/plain` response body as
//! it arrives. This is how a terminal client talks to a `wove serve` instance
//! instead of holding the provider key itself.

use futures_util::StreamExt;
use tracing::debug;

use wove_core::llm::{ByteStream, GenerationBackend};
use wove_types::llm::{GenerationError, GenerationRequest, ProxyChatRequest};

#[derive(Debug, Clone)]
pub struct HttpStreamBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpStreamBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl GenerationBackend for HttpStreamBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn open_stream(&self, request: GenerationRequest) -> Result<ByteStream, GenerationError> {
        let body = ProxyChatRequest::from_generation(&request);
        if body.message.is_none() {
            return Err(GenerationError::InvalidRequest(
                "the last turn must be a user message".to_string(),
            ));
        }

        debug!(endpoint = %self.endpoint, turns = request.turns.len(), "Posting chat request");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| GenerationError::Transport(e.to_string()))
        })))
    }
}
