use serde::{Deserialize, Serialize};

use super::{env_opt_string, env_parse};

/// Emotion-analytics service endpoint. Unset URL disables the service;
/// the context assembler then omits the emotion section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmoConfig {
    pub url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EmoConfig {
    fn default() -> Self {
        Self { url: None, timeout_ms: 5_000 }
    }
}

impl EmoConfig {
    pub fn from_env(prev: &Self) -> Self {
        Self {
            url: env_opt_string("SENTRA_EMO_URL", &prev.url),
            timeout_ms: env_parse("SENTRA_EMO_TIMEOUT", prev.timeout_ms),
        }
    }

    pub fn enabled(&self) -> bool {
        self.url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_url() {
        assert!(!EmoConfig::default().enabled());
        let cfg = EmoConfig { url: Some("http://emo:8080".into()), timeout_ms: 1000 };
        assert!(cfg.enabled());
    }
}
