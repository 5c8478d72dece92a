//! Global configuration types for Wove.
//!
//! `GlobalConfig` represents the top-level `config.toml` in the data
//! directory. Every field has a default so an empty or partial file works.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Which generation backend the chat engine streams from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible chat completions API, called directly.
    #[default]
    OpenAi,
    /// A `wove serve` style text-streaming proxy route.
    Http,
}

/// Settings for the generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Full URL of the proxy route, used by the `http` backend.
    #[serde(default = "default_chat_endpoint")]
    pub chat_endpoint: String,
}

fn default_base_url() -> String {
    "https://api.poe.com/v1".to_string()
}

fn default_model() -> String {
    "Wove-5".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_api_key_env() -> String {
    "POE_API_KEY".to_string()
}

fn default_chat_endpoint() -> String {
    "http://127.0.0.1:3000/api/chat".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key_env: default_api_key_env(),
            chat_endpoint: default_chat_endpoint(),
        }
    }
}

/// Settings for the chat engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Viewer identity used by the terminal front end.
    #[serde(default = "default_owner_id")]
    pub owner_id: String,

    /// Minimum delay between content writes while streaming.
    /// Zero together with `flush_max_chars = 0` writes on every delta.
    #[serde(default)]
    pub flush_interval_ms: u64,

    /// Write once this many characters are pending, regardless of delay.
    #[serde(default)]
    pub flush_max_chars: usize,
}

fn default_owner_id() -> String {
    "local".to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            owner_id: default_owner_id(),
            flush_interval_ms: 0,
            flush_max_chars: 0,
        }
    }
}

/// Settings for `wove serve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
