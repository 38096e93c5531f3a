use serde::{Deserialize, Serialize};

use super::{env_bool, env_parse, env_string};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context assembly configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Pairs retained per conversation before the oldest are discarded.
    pub max_conversation_pairs: usize,
    /// Pairs included in one MCP run's conversation payload.
    pub mcp_max_context_pairs: usize,
    /// Daily context-memory digests.
    pub context_memory_enabled: bool,
    pub context_memory_model: String,
    /// Discarded-pair count that triggers a digest summarization.
    pub context_memory_trigger_discarded_pairs: usize,
    /// Base prompt template: `auto | router | response_only | tools_only`.
    pub base_template: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_conversation_pairs: 40,
            mcp_max_context_pairs: 8,
            context_memory_enabled: false,
            context_memory_model: "gpt-4o-mini".into(),
            context_memory_trigger_discarded_pairs: 12,
            base_template: "auto".into(),
        }
    }
}

impl ContextConfig {
    pub fn from_env(prev: &Self) -> Self {
        Self {
            max_conversation_pairs: env_parse(
                "MAX_CONVERSATION_PAIRS",
                prev.max_conversation_pairs,
            ),
            mcp_max_context_pairs: env_parse(
                "MCP_MAX_CONTEXT_PAIRS",
                prev.mcp_max_context_pairs,
            ),
            context_memory_enabled: env_bool(
                "CONTEXT_MEMORY_ENABLED",
                prev.context_memory_enabled,
            ),
            context_memory_model: env_string(
                "CONTEXT_MEMORY_MODEL",
                &prev.context_memory_model,
            ),
            context_memory_trigger_discarded_pairs: env_parse(
                "CONTEXT_MEMORY_TRIGGER_DISCARDED_PAIRS",
                prev.context_memory_trigger_discarded_pairs,
            ),
            base_template: env_string("BASE_TEMPLATE", &prev.base_template),
        }
    }
}
