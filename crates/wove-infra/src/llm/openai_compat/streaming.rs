//! OpenAI SSE stream to byte stream adapter.
//!
//! `async-openai` reports HTTP and API errors as the first item of the
//! response stream rather than from `create_stream`. [`open_text_stream`]
//! reads that first item before handing the stream to the engine, so a
//! rejected request fails the turn up front.

use async_openai::error::OpenAIError;
use async_openai::types::chat::{ChatCompletionResponseStream, CreateChatCompletionStreamResponse};
use futures_util::StreamExt;

use wove_core::llm::ByteStream;
use wove_types::llm::GenerationError;

/// Await the first chunk, then expose the remaining text content as bytes.
pub async fn open_text_stream(mut stream: ChatCompletionResponseStream) -> Result<ByteStream, GenerationError> {
    let first = match stream.next().await {
        Some(Ok(chunk)) => Some(chunk),
        Some(Err(e)) => return Err(map_openai_error(e)),
        None => None,
    };

    Ok(Box::pin(async_stream::try_stream! {
        if let Some(chunk) = first {
            let text = chunk_text(&chunk);
            if !text.is_empty() {
                yield text.into_bytes();
            }
        }

        while let Some(result) = stream.next().await {
            let chunk = result.map_err(|e| GenerationError::Transport(e.to_string()))?;
            let text = chunk_text(&chunk);
            if !text.is_empty() {
                yield text.into_bytes();
            }
        }
    }))
}

/// Concatenated content of every choice in a chunk.
fn chunk_text(chunk: &CreateChatCompletionStreamResponse) -> String {
    chunk
        .choices
        .iter()
        .filter_map(|choice| choice.delta.content.as_deref())
        .collect()
}

/// Map an `async_openai` error to a [`GenerationError`].
pub fn map_openai_error(err: OpenAIError) -> GenerationError {
    match &err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");

            if code == "authentication_error"
                || error_type == "authentication_error"
                || api_err.message.contains("Incorrect API key")
                || api_err.message.contains("Invalid API key")
            {
                GenerationError::AuthenticationFailed
            } else if error_type == "invalid_request_error" {
                GenerationError::InvalidRequest(api_err.message.clone())
            } else {
                GenerationError::Transport(err.to_string())
            }
        }
        OpenAIError::Reqwest(reqwest_err) => match reqwest_err.status() {
            Some(status) if status.as_u16() == 401 => GenerationError::AuthenticationFailed,
            Some(status) => GenerationError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => GenerationError::Transport(err.to_string()),
        },
        OpenAIError::JSONDeserialize(_, content) => {
            GenerationError::Malformed(format!("failed to parse response: {content}"))
        }
        OpenAIError::StreamError(stream_err) => GenerationError::Transport(stream_err.to_string()),
        OpenAIError::InvalidArgument(msg) => GenerationError::InvalidRequest(msg.clone()),
        _ => GenerationError::Transport(err.to_string()),
    }
}
