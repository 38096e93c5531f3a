use serde::{Deserialize, Serialize};

use super::{env_bool, env_opt_string, env_parse, env_string};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM endpoint configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timeouts are milliseconds, capped at [`LlmConfig::HARD_TIMEOUT_MS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    /// Retries for a reply that fails format or token validation.
    pub max_response_retries: u32,
    /// Token budget for one extracted reply.
    pub max_response_tokens: u32,
    /// When false, the `<sentra-response>` format check only logs.
    pub strict_format_check: bool,
}

impl LlmConfig {
    pub const HARD_TIMEOUT_MS: u64 = 900_000;
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: 2_048,
            timeout_ms: 180_000,
            max_response_retries: 2,
            max_response_tokens: 1_200,
            strict_format_check: true,
        }
    }
}

impl LlmConfig {
    pub fn from_env(prev: &Self) -> Self {
        let timeout_ms =
            env_parse("TIMEOUT", prev.timeout_ms).min(Self::HARD_TIMEOUT_MS);
        Self {
            api_key: env_opt_string("API_KEY", &prev.api_key),
            api_base_url: env_string("API_BASE_URL", &prev.api_base_url),
            model: env_string("MAIN_AI_MODEL", &prev.model),
            temperature: env_parse("TEMPERATURE", prev.temperature),
            max_tokens: env_parse("MAX_TOKENS", prev.max_tokens),
            timeout_ms,
            max_response_retries: env_parse(
                "MAX_RESPONSE_RETRIES",
                prev.max_response_retries,
            ),
            max_response_tokens: env_parse(
                "MAX_RESPONSE_TOKENS",
                prev.max_response_tokens,
            ),
            strict_format_check: env_bool(
                "ENABLE_STRICT_FORMAT_CHECK",
                prev.strict_format_check,
            ),
        }
    }
}
