//! OpenAI-compatible generation backend.
//!
//! Talks to any chat completions API that speaks the OpenAI protocol (the
//! default configuration points at Poe). Uses [`async_openai`] for the
//! request types and SSE streaming; content deltas are re-emitted as raw
//! UTF-8 bytes so the engine's ingester handles every backend the same way.

pub mod streaming;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestMessageContentPartText, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, ImageUrl,
};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use wove_core::llm::{ByteStream, GenerationBackend};
use wove_types::config::GenerationConfig;
use wove_types::llm::{GenerationError, GenerationRequest, GenerationTurn};
use wove_types::chat::MessageRole;

use self::streaming::{map_openai_error, open_text_stream};

/// Streaming backend for any OpenAI-compatible API.
///
/// Does NOT derive Debug: the `async_openai::Client` holds the API key.
pub struct OpenAiCompatibleBackend {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(api_key: SecretString, base_url: &str, model: &str) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(base_url);

        Self {
            client: Client::with_config(openai_config),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &GenerationConfig, api_key: SecretString) -> Self {
        Self::new(api_key, &config.base_url, &config.model)
    }

    fn build_request(&self, request: &GenerationRequest) -> Result<CreateChatCompletionRequest, GenerationError> {
        if request.turns.is_empty() {
            return Err(GenerationError::InvalidRequest("no conversation turns".to_string()));
        }

        let messages = request.turns.iter().map(to_openai_message).collect();

        // The request model wins; an empty one falls back to the configured default.
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        Ok(CreateChatCompletionRequest {
            model,
            messages,
            max_completion_tokens: Some(request.max_tokens),
            temperature: request.temperature.map(|t| t as f32),
            stream: Some(true),
            ..Default::default()
        })
    }
}

fn to_openai_message(turn: &GenerationTurn) -> ChatCompletionRequestMessage {
    match turn.role {
        MessageRole::User => {
            let content = match &turn.attachment {
                Some(attachment) => {
                    let mut parts = Vec::with_capacity(2);
                    if !turn.content.is_empty() {
                        parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                            ChatCompletionRequestMessageContentPartText {
                                text: turn.content.clone(),
                            },
                        ));
                    }
                    parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                        ChatCompletionRequestMessageContentPartImage {
                            image_url: ImageUrl {
                                url: attachment.to_uri(),
                                detail: None,
                            },
                        },
                    ));
                    ChatCompletionRequestUserMessageContent::Array(parts)
                }
                None => ChatCompletionRequestUserMessageContent::Text(turn.content.clone()),
            };
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage { content, name: None })
        }
        MessageRole::Assistant => {
            #[allow(deprecated)]
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(ChatCompletionRequestAssistantMessageContent::Text(turn.content.clone())),
                refusal: None,
                name: None,
                audio: None,
                tool_calls: None,
                function_call: None,
            })
        }
    }
}

// OpenAiCompatibleBackend intentionally does NOT derive Debug to keep the API
// key inside the async-openai Client out of logs.

impl GenerationBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn open_stream(&self, request: GenerationRequest) -> Result<ByteStream, GenerationError> {
        let oai_request = self.build_request(&request)?;
        debug!(model = %oai_request.model, turns = request.turns.len(), "Opening completion stream");

        let stream = self
            .client
            .chat()
            .create_stream(oai_request)
            .await
            .map_err(map_openai_error)?;

        open_text_stream(stream).await
    }
}
