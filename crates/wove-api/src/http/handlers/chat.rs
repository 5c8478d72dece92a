//! Generation proxy endpoint.
//!
//! POST /api/chat
//!
//! Body: `{ "message": "...", "conversationHistory": [...], "image": "..." }`.
//! Forwards the conversation to the upstream OpenAI-compatible backend and
//! streams the completion back as `text/plain; charset=utf-8`. A transport
//! error after the first byte aborts the response body.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tracing::{Instrument, warn};

use wove_observe::genai_attrs::{OP_CHAT_PROXY, generation_span};
use wove_types::llm::{GenerationRequest, ProxyChatRequest};

use crate::http::error::AppError;
use crate::state::AppState;

/// POST /api/chat - stream a completion for the given conversation.
pub async fn proxy_chat(
    State(state): State<AppState>,
    Json(body): Json<ProxyChatRequest>,
) -> Result<Response, AppError> {
    let turns = body
        .into_turns()
        .ok_or_else(|| AppError::Validation("Message is required".to_string()))?;

    let upstream = state
        .upstream
        .clone()
        .ok_or_else(|| AppError::Unavailable("Generation backend is not configured".to_string()))?;

    let generation = &state.config.generation;
    let request = GenerationRequest {
        model: generation.model.clone(),
        turns,
        max_tokens: generation.max_tokens,
        temperature: Some(generation.temperature),
    };

    let span = generation_span(
        OP_CHAT_PROXY,
        upstream.name(),
        &request.model,
        request.max_tokens,
        request.temperature,
    );
    let stream = upstream.open_stream(request).instrument(span).await?;

    let stream = stream.inspect(|chunk| {
        if let Err(e) = chunk {
            warn!(error = %e, "Upstream stream failed mid-response");
        }
    });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}
