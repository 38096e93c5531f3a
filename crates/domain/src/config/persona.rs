use serde::{Deserialize, Serialize};

use super::{env_bool, env_parse};

/// Persona extraction cadence and sampling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub enabled: bool,
    /// Re-derive the persona after this many new samples from a user.
    pub update_every: usize,
    /// Retained message samples per user.
    pub max_samples: usize,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self { enabled: true, update_every: 5, max_samples: 50 }
    }
}

impl PersonaConfig {
    pub fn from_env(prev: &Self) -> Self {
        Self {
            enabled: env_bool("PERSONA_ENABLED", prev.enabled),
            update_every: env_parse("PERSONA_UPDATE_EVERY", prev.update_every).max(1),
            max_samples: env_parse("PERSONA_MAX_SAMPLES", prev.max_samples).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_never_zero() {
        std::env::set_var("PERSONA_UPDATE_EVERY", "0");
        let cfg = PersonaConfig::from_env(&PersonaConfig::default());
        assert_eq!(cfg.update_every, 1);
        std::env::remove_var("PERSONA_UPDATE_EVERY");
    }
}
