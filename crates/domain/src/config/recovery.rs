use serde::{Deserialize, Serialize};

use super::env_parse;

/// Task-recovery scan cadence, retry cap, and journal TTL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub scan_interval_ms: u64,
    /// Failed recoveries before the record is abandoned and deleted.
    pub max_failure_attempts: u32,
    /// Journals older than this are deleted unprocessed.
    pub file_ttl_hours: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { scan_interval_ms: 60_000, max_failure_attempts: 3, file_ttl_hours: 72 }
    }
}

impl RecoveryConfig {
    pub fn from_env(prev: &Self) -> Self {
        Self {
            scan_interval_ms: env_parse("TASK_RECOVERY_SCAN_INTERVAL_MS", prev.scan_interval_ms)
                .max(100),
            max_failure_attempts: env_parse(
                "TASK_RECOVERY_MAX_FAILURE_ATTEMPTS",
                prev.max_failure_attempts,
            )
            .max(1),
            file_ttl_hours: env_parse("TASK_RECOVERY_FILE_TTL_HOURS", prev.file_ttl_hours),
        }
    }
}
