//! The chat client seam.

use sentra_domain::config::LlmConfig;
use sentra_domain::{ChatMessage, Result};

/// Per-call options. Built from the current config snapshot so hot-reloaded
/// values (model, key, timeout) apply to the next call.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub api_key: Option<String>,
    pub api_base_url: String,
}

impl ChatOptions {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self {
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            timeout_ms: cfg.timeout_ms,
            api_key: cfg.api_key.clone(),
            api_base_url: cfg.api_base_url.clone(),
        }
    }

    /// Same options targeting a different model (classifier / summarizer
    /// calls use cheaper models than the main one).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Trait every chat backend implements.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request and wait for the full text response.
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String>;
}
