//! Run registry — live MCP runs per `(sender, conversation key)`, with
//! targeted cancellation.
//!
//! A user asking the bot to stop in group A must not cancel the bot's work
//! in group B or in their private chat, so cancellation is always scoped to
//! one conversation cell, and within it optionally to runs started at or
//! before a cutoff.

use std::collections::HashMap;

use parking_lot::Mutex;

use sentra_domain::{CancelScope, ConversationKey};
use sentra_mcp::McpExecutor;

/// `sender → (conversation key → (run id → started_at epoch ms))`.
pub struct RunRegistry {
    inner: Mutex<HashMap<String, HashMap<String, HashMap<String, i64>>>>,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    /// Insert a run with `started_at = now`.
    pub fn track(&self, sender: &str, key: &ConversationKey, run_id: &str) {
        self.track_at(sender, key, run_id, crate::now_ms());
    }

    /// Insert with an explicit timestamp (cutoff tests need control).
    pub fn track_at(&self, sender: &str, key: &ConversationKey, run_id: &str, started_at_ms: i64) {
        self.inner
            .lock()
            .entry(sender.to_owned())
            .or_default()
            .entry(key.as_str().to_owned())
            .or_default()
            .insert(run_id.to_owned(), started_at_ms);
    }

    /// Remove a run; empty inner maps are pruned. Returns `true` when the
    /// run was present (exact inverse of `track`).
    pub fn untrack(&self, sender: &str, key: &ConversationKey, run_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(by_key) = inner.get_mut(sender) else {
            return false;
        };
        let Some(runs) = by_key.get_mut(key.as_str()) else {
            return false;
        };
        let removed = runs.remove(run_id).is_some();
        if runs.is_empty() {
            by_key.remove(key.as_str());
        }
        if by_key.is_empty() {
            inner.remove(sender);
        }
        removed
    }

    pub fn run_count(&self, sender: &str, key: &ConversationKey) -> usize {
        self.inner
            .lock()
            .get(sender)
            .and_then(|by_key| by_key.get(key.as_str()))
            .map(|runs| runs.len())
            .unwrap_or(0)
    }

    /// Cancel runs in one conversation cell. A `None` key defaults to the
    /// sender's private conversation.
    ///
    /// Matching runs are removed from the registry and `cancel_run` is
    /// pushed to the executor for each (failures are logged; the run is
    /// still dropped from the registry). Returns the cancelled run ids.
    pub async fn cancel(
        &self,
        executor: &dyn McpExecutor,
        sender: &str,
        key: Option<&ConversationKey>,
        scope: CancelScope,
    ) -> Vec<String> {
        let default_key = ConversationKey::user(sender);
        let key = key.unwrap_or(&default_key);

        // Collect matches under the lock, call the executor outside it.
        let victims: Vec<String> = {
            let mut inner = self.inner.lock();
            let Some(by_key) = inner.get_mut(sender) else {
                return Vec::new();
            };
            let Some(runs) = by_key.get_mut(key.as_str()) else {
                return Vec::new();
            };
            let victims: Vec<String> = runs
                .iter()
                .filter(|(_, started)| match scope {
                    CancelScope::Conversation => true,
                    CancelScope::Cutoff(cutoff) => **started <= cutoff,
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &victims {
                runs.remove(id);
            }
            if runs.is_empty() {
                by_key.remove(key.as_str());
            }
            if by_key.is_empty() {
                inner.remove(sender);
            }
            victims
        };

        for run_id in &victims {
            if let Err(e) = executor.cancel_run(run_id).await {
                tracing::warn!(run_id = %run_id, error = %e, "executor cancel failed");
            } else {
                tracing::info!(sender, key = %key, run_id = %run_id, "run cancelled");
            }
        }
        victims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_mcp::MockExecutor;

    #[test]
    fn track_untrack_is_exact_inverse() {
        let reg = RunRegistry::new();
        let key = ConversationKey::group("g1");

        reg.track("u1", &key, "r1");
        assert_eq!(reg.run_count("u1", &key), 1);

        assert!(reg.untrack("u1", &key, "r1"));
        assert_eq!(reg.run_count("u1", &key), 0);
        // The registry is fully pruned: a second untrack finds nothing.
        assert!(!reg.untrack("u1", &key, "r1"));
    }

    #[test]
    fn untrack_unknown_is_false() {
        let reg = RunRegistry::new();
        assert!(!reg.untrack("ghost", &ConversationKey::user("ghost"), "r1"));
    }

    #[tokio::test]
    async fn conversation_scope_cancels_all_in_cell() {
        let reg = RunRegistry::new();
        let exec = MockExecutor::new();
        let key = ConversationKey::group("g1");

        reg.track_at("u1", &key, "r1", 1_000);
        reg.track_at("u1", &key, "r2", 2_000);

        let cancelled = reg
            .cancel(exec.as_ref(), "u1", Some(&key), CancelScope::Conversation)
            .await;
        assert_eq!(cancelled.len(), 2);
        assert_eq!(reg.run_count("u1", &key), 0);
        assert_eq!(exec.cancelled_runs().len(), 2);
    }

    #[tokio::test]
    async fn cutoff_scope_spares_newer_runs() {
        let reg = RunRegistry::new();
        let exec = MockExecutor::new();
        let key = ConversationKey::group("g1");

        reg.track_at("u1", &key, "r-old", 1_000);
        reg.track_at("u1", &key, "r-new", 1_500);

        let cancelled = reg
            .cancel(exec.as_ref(), "u1", Some(&key), CancelScope::Cutoff(1_400))
            .await;
        assert_eq!(cancelled, vec!["r-old".to_string()]);
        assert_eq!(reg.run_count("u1", &key), 1);
        assert_eq!(exec.cancelled_runs(), vec!["r-old".to_string()]);
    }

    #[tokio::test]
    async fn cutoff_before_all_runs_cancels_nothing() {
        let reg = RunRegistry::new();
        let exec = MockExecutor::new();
        let key = ConversationKey::group("g1");

        reg.track_at("u1", &key, "r1", 1_000);
        let cancelled = reg
            .cancel(exec.as_ref(), "u1", Some(&key), CancelScope::Cutoff(900))
            .await;
        assert!(cancelled.is_empty());
        assert_eq!(reg.run_count("u1", &key), 1);
        assert!(exec.cancelled_runs().is_empty());
    }

    #[tokio::test]
    async fn other_conversations_of_same_sender_are_untouched() {
        let reg = RunRegistry::new();
        let exec = MockExecutor::new();
        let group = ConversationKey::group("g1");
        let private = ConversationKey::user("u1");

        reg.track_at("u1", &group, "r-group", 1_000);
        reg.track_at("u1", &private, "r-private", 1_500);

        let cancelled = reg
            .cancel(exec.as_ref(), "u1", Some(&group), CancelScope::Cutoff(2_000))
            .await;
        assert_eq!(cancelled, vec!["r-group".to_string()]);
        assert_eq!(reg.run_count("u1", &private), 1);
        assert_eq!(exec.cancelled_runs(), vec!["r-group".to_string()]);
    }

    #[tokio::test]
    async fn missing_key_defaults_to_private_conversation() {
        let reg = RunRegistry::new();
        let exec = MockExecutor::new();
        let private = ConversationKey::user("u1");

        reg.track_at("u1", &private, "r1", 1_000);
        let cancelled = reg
            .cancel(exec.as_ref(), "u1", None, CancelScope::Conversation)
            .await;
        assert_eq!(cancelled, vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn cancel_for_unknown_sender_is_empty() {
        let reg = RunRegistry::new();
        let exec = MockExecutor::new();
        let out = reg
            .cancel(exec.as_ref(), "nobody", None, CancelScope::Conversation)
            .await;
        assert!(out.is_empty());
    }
}
