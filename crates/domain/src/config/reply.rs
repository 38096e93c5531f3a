use serde::{Deserialize, Serialize};

use super::{env_list, env_parse, env_string};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reply-policy configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    /// The bot's own account id; mentions of it are a mandatory signal.
    pub bot_id: String,
    /// Names the bot answers to in plain text.
    pub bot_names: Vec<String>,
    /// Base probability threshold for non-mandatory group messages.
    pub base_threshold: f64,
    /// Private messages always reply.
    pub private_always_reply: bool,
    /// Run the lightweight LLM pre-reply check before taking a slot for
    /// non-mandatory admissions.
    pub pre_reply_check: bool,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            bot_id: String::new(),
            bot_names: Vec::new(),
            base_threshold: 0.65,
            private_always_reply: true,
            pre_reply_check: false,
        }
    }
}

impl ReplyConfig {
    pub fn from_env(prev: &Self) -> Self {
        Self {
            bot_id: env_string("BOT_ID", &prev.bot_id),
            bot_names: env_list("BOT_NAMES", &prev.bot_names),
            base_threshold: env_parse("REPLY_BASE_THRESHOLD", prev.base_threshold)
                .clamp(0.0, 1.0),
            private_always_reply: super::env_bool(
                "REPLY_PRIVATE_ALWAYS",
                prev.private_always_reply,
            ),
            pre_reply_check: super::env_bool("REPLY_PRE_CHECK_ENABLED", prev.pre_reply_check),
        }
    }
}
