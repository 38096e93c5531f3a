use serde::{Deserialize, Serialize};

use super::{env_bool, env_parse};

/// Delayed-job worker polling and lag policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DelayQueueConfig {
    pub poll_interval_ms: u64,
    /// A job this far past due is no longer dispatched normally.
    pub max_lag_ms: u64,
    /// Over-lagged jobs: `true` drops them, `false` retries with backoff.
    pub drop_on_lag: bool,
}

impl Default for DelayQueueConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 1_000, max_lag_ms: 600_000, drop_on_lag: true }
    }
}

impl DelayQueueConfig {
    pub fn from_env(prev: &Self) -> Self {
        Self {
            poll_interval_ms: env_parse(
                "DELAY_QUEUE_POLL_INTERVAL_MS",
                prev.poll_interval_ms,
            )
            .max(10),
            max_lag_ms: env_parse("DELAY_QUEUE_MAX_LAG_MS", prev.max_lag_ms),
            drop_on_lag: env_bool("DELAY_QUEUE_DROP_ON_LAG", prev.drop_on_lag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_floor() {
        std::env::set_var("DELAY_QUEUE_POLL_INTERVAL_MS", "1");
        let cfg = DelayQueueConfig::from_env(&DelayQueueConfig::default());
        assert_eq!(cfg.poll_interval_ms, 10);
        std::env::remove_var("DELAY_QUEUE_POLL_INTERVAL_MS");
    }
}
