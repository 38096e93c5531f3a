//! Task-recovery journals.
//!
//! Unfinished tasks leave a `<task_id>.json` record (plus an optional
//! sibling `.md` scratchpad) under the task-data root. The recovery
//! scheduler scans these, re-executes the residual work, and either deletes
//! the artifacts (success, TTL expiry, or give-up) or bumps the failure
//! counter via write-temp-then-rename. A counter update that cannot be
//! persisted deletes the artifacts instead, so a record can never get stuck
//! silently resetting its count.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sentra_domain::Result;

use crate::write_atomic;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecoveryRecord {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub recovery_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recovery_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recovery_status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub promises: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<Value>,
}

impl TaskRecoveryRecord {
    /// The residual work, for the synthetic root directive.
    pub fn residual_summary(&self) -> &str {
        self.summary
            .as_deref()
            .or(self.reason.as_deref())
            .unwrap_or("unfinished task")
    }

    /// Expired either by its own `expires_at` or by the global file TTL.
    pub fn is_expired(&self, ttl_hours: u64, now: DateTime<Utc>) -> bool {
        if let Some(expires) = self.expires_at {
            if now >= expires {
                return true;
            }
        }
        ttl_hours > 0 && now - self.created_at >= Duration::hours(ttl_hours as i64)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Journal
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RecoveryJournal {
    root: PathBuf,
}

impl RecoveryJournal {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self { root: root.to_path_buf() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All parseable records under the root (recursive), with their paths.
    /// Unparseable files are logged and skipped, never deleted here.
    pub fn scan(&self) -> Vec<(PathBuf, TaskRecoveryRecord)> {
        let pattern = format!("{}/**/*.json", self.root.display());
        let mut out = Vec::new();
        let paths = match glob::glob(&pattern) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "bad recovery scan pattern");
                return out;
            }
        };
        for entry in paths.flatten() {
            match std::fs::read_to_string(&entry)
                .map_err(sentra_domain::Error::Io)
                .and_then(|raw| Ok(serde_json::from_str::<TaskRecoveryRecord>(&raw)?))
            {
                Ok(record) => out.push((entry, record)),
                Err(e) => {
                    tracing::warn!(path = %entry.display(), error = %e, "skipping unreadable recovery record");
                }
            }
        }
        // Oldest first, so long-waiting tasks recover first.
        out.sort_by_key(|(_, r)| r.created_at);
        out
    }

    /// Record one failed recovery attempt. The update is atomic; if it
    /// cannot be persisted the artifacts are deleted so the counter never
    /// silently resets.
    pub fn record_failure(
        &self,
        path: &Path,
        record: &mut TaskRecoveryRecord,
        status: &str,
    ) {
        record.recovery_count += 1;
        record.last_recovery_at = Some(Utc::now());
        record.last_recovery_status = Some(status.to_owned());

        let json = match serde_json::to_string_pretty(record) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot serialize recovery record, deleting");
                self.delete_artifacts(path);
                return;
            }
        };
        if let Err(e) = write_atomic(path, &json) {
            tracing::warn!(path = %path.display(), error = %e, "cannot persist recovery update, deleting");
            self.delete_artifacts(path);
        }
    }

    /// Delete the `.json` record and any sibling `.md` scratchpad.
    pub fn delete_artifacts(&self, path: &Path) {
        let _ = std::fs::remove_file(path);
        let md = path.with_extension("md");
        if md.exists() {
            let _ = std::fs::remove_file(md);
        }
    }
}
