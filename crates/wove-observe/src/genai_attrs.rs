//! OpenTelemetry GenAI Semantic Convention attribute constants.
//!
//! These follow the OTel GenAI Semantic Conventions for consistent
//! instrumentation of generation calls. Field names in `tracing` macros must
//! be written literally, so [`generation_span`] declares them empty and
//! records values through these constants.

use tracing::Span;

/// The name of the operation being performed (e.g., "chat").
pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";

/// The generation backend (e.g., "openai", "http").
pub const GEN_AI_SYSTEM: &str = "gen_ai.system";

/// The model ID requested (e.g., "Wove-5").
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";

/// The sampling temperature for the request.
pub const GEN_AI_REQUEST_TEMPERATURE: &str = "gen_ai.request.temperature";

/// The maximum number of output tokens requested.
pub const GEN_AI_REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";

/// Standard chat completion operation.
pub const OP_CHAT: &str = "chat";

/// Chat completion relayed through the `/api/chat` proxy route.
pub const OP_CHAT_PROXY: &str = "chat_proxy";

/// Span for one generation call, with the GenAI attributes recorded.
pub fn generation_span(
    operation: &str,
    system: &str,
    model: &str,
    max_tokens: u32,
    temperature: Option<f64>,
) -> Span {
    let span = tracing::info_span!(
        "gen_ai",
        gen_ai.operation.name = tracing::field::Empty,
        gen_ai.system = tracing::field::Empty,
        gen_ai.request.model = tracing::field::Empty,
        gen_ai.request.max_tokens = tracing::field::Empty,
        gen_ai.request.temperature = tracing::field::Empty,
    );
    span.record(GEN_AI_OPERATION_NAME, operation);
    span.record(GEN_AI_SYSTEM, system);
    span.record(GEN_AI_REQUEST_MODEL, model);
    span.record(GEN_AI_REQUEST_MAX_TOKENS, max_tokens);
    if let Some(temperature) = temperature {
        span.record(GEN_AI_REQUEST_TEMPERATURE, temperature);
    }
    span
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_names_share_prefix() {
        for name in [
            GEN_AI_OPERATION_NAME,
            GEN_AI_SYSTEM,
            GEN_AI_REQUEST_MODEL,
            GEN_AI_REQUEST_TEMPERATURE,
            GEN_AI_REQUEST_MAX_TOKENS,
        ] {
            assert!(name.starts_with("gen_ai."), "{name}");
        }
    }

    #[test]
    fn test_generation_span_without_subscriber() {
        let span = generation_span(OP_CHAT, "openai", "Wove-5", 1000, Some(0.7));
        let _entered = span.enter();
    }
}
