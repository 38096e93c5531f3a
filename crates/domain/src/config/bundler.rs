use serde::{Deserialize, Serialize};

use super::env_parse;

/// Burst-coalescing window parameters.
///
/// A bundle seals when no message arrived within the latest `window_ms`
/// slice, or unconditionally once `max_ms` has elapsed since it opened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BundlerConfig {
    pub window_ms: u64,
    pub max_ms: u64,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self { window_ms: 500, max_ms: 2_000 }
    }
}

impl BundlerConfig {
    pub fn from_env(prev: &Self) -> Self {
        Self {
            window_ms: env_parse("BUNDLE_WINDOW_MS", prev.window_ms).max(1),
            max_ms: env_parse("BUNDLE_MAX_MS", prev.max_ms).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_window_clamped_to_one() {
        std::env::set_var("BUNDLE_WINDOW_MS", "0");
        let cfg = BundlerConfig::from_env(&BundlerConfig::default());
        assert_eq!(cfg.window_ms, 1);
        std::env::remove_var("BUNDLE_WINDOW_MS");
    }
}
