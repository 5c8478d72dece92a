//! Generation backend implementations.
//!
//! Concrete implementations of the [`GenerationBackend`] port defined in
//! `wove-core`, and a factory ([`create_backend`]) that picks one from the
//! `[generation]` config section.
//!
//! [`GenerationBackend`]: wove_core::llm::GenerationBackend

pub mod http_stream;
pub mod openai_compat;

use secrecy::SecretString;
use tracing::info;

use wove_core::llm::BoxGenerationBackend;
use wove_types::config::{BackendKind, GenerationConfig};
use wove_types::llm::GenerationError;

use self::http_stream::HttpStreamBackend;
use self::openai_compat::OpenAiCompatibleBackend;

/// Read the provider API key from the environment variable named in config.
pub fn api_key_from_env(config: &GenerationConfig) -> Result<SecretString, GenerationError> {
    match std::env::var(&config.api_key_env) {
        Ok(key) if !key.trim().is_empty() => Ok(SecretString::from(key)),
        _ => Err(GenerationError::AuthenticationFailed),
    }
}

/// Create a [`BoxGenerationBackend`] from the `[generation]` config section.
///
/// # Errors
///
/// Returns `AuthenticationFailed` if the OpenAI-compatible backend is
/// selected and its API key variable is unset or empty.
pub fn create_backend(config: &GenerationConfig) -> Result<BoxGenerationBackend, GenerationError> {
    match config.backend {
        BackendKind::OpenAi => {
            let key = api_key_from_env(config)?;
            info!(base_url = %config.base_url, model = %config.model, "Using OpenAI-compatible backend");
            Ok(BoxGenerationBackend::new(OpenAiCompatibleBackend::from_config(config, key)))
        }
        BackendKind::Http => {
            info!(endpoint = %config.chat_endpoint, "Using HTTP stream backend");
            Ok(BoxGenerationBackend::new(HttpStreamBackend::new(config.chat_endpoint.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_backend_needs_no_key() {
        let config = GenerationConfig {
            backend: BackendKind::Http,
            api_key_env: "WOVE_TEST_UNSET_KEY_HTTP".to_string(),
            ..Default::default()
        };
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.name(), "http");
    }

    #[test]
    fn test_missing_api_key_fails() {
        let config = GenerationConfig {
            api_key_env: "WOVE_TEST_UNSET_KEY_OPENAI".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_backend(&config),
            Err(GenerationError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_api_key_read_from_configured_variable() {
        // SAFETY: the variable name is unique to this test.
        unsafe {
            std::env::set_var("WOVE_TEST_KEY_PRESENT", "sk-test");
        }
        let config = GenerationConfig {
            api_key_env: "WOVE_TEST_KEY_PRESENT".to_string(),
            ..Default::default()
        };
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.name(), "openai");
        unsafe {
            std::env::remove_var("WOVE_TEST_KEY_PRESENT");
        }
    }
}
