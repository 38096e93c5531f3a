//! Environment-driven configuration.
//!
//! Every tunable is read from the process environment into an immutable
//! [`Config`] snapshot. Live code holds a [`ConfigHandle`] and dereferences
//! one snapshot per call; a refresher swaps the snapshot atomically, so new
//! values apply to subsequent calls without restart. A snapshot is never
//! mutated in place.
//!
//! Per-key parse failures fall back to the previous value (or the default on
//! first load) and log a warning; a bad value never takes the process down.

mod bundler;
mod context;
mod delay_queue;
mod emo;
mod llm;
mod persona;
mod recovery;
mod reply;
mod transport;

pub use bundler::*;
pub use context::*;
pub use delay_queue::*;
pub use emo::*;
pub use llm::*;
pub use persona::*;
pub use recovery::*;
pub use reply::*;
pub use transport::*;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub bundler: BundlerConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub delay_queue: DelayQueueConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub emo: EmoConfig,
}

impl Config {
    /// Build a snapshot from the current process environment, falling back
    /// to `base` (the previous snapshot) for keys that fail to parse.
    pub fn from_env_with(base: &Config) -> Config {
        Config {
            transport: TransportConfig::from_env(&base.transport),
            llm: LlmConfig::from_env(&base.llm),
            bundler: BundlerConfig::from_env(&base.bundler),
            context: ContextConfig::from_env(&base.context),
            persona: PersonaConfig::from_env(&base.persona),
            reply: ReplyConfig::from_env(&base.reply),
            delay_queue: DelayQueueConfig::from_env(&base.delay_queue),
            recovery: RecoveryConfig::from_env(&base.recovery),
            emo: EmoConfig::from_env(&base.emo),
        }
    }

    pub fn from_env() -> Config {
        Self::from_env_with(&Config::default())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared handle to the current config snapshot. Cloning is cheap; all
/// clones observe the same snapshot swaps.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<parking_lot::RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self { inner: Arc::new(parking_lot::RwLock::new(Arc::new(config))) }
    }

    /// Take the current snapshot. The returned `Arc` stays valid across
    /// later swaps; callers read it without further locking.
    pub fn snapshot(&self) -> Arc<Config> {
        self.inner.read().clone()
    }

    /// Atomically replace the snapshot.
    pub fn replace(&self, config: Config) {
        *self.inner.write() = Arc::new(config);
    }

    /// Re-read the environment on top of the current snapshot and swap.
    pub fn reload_from_env(&self) {
        let next = Config::from_env_with(&self.snapshot());
        self.replace(next);
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Env parsing helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn env_string(key: &str, prev: &str) -> String {
    match std::env::var(key) {
        Ok(v) => v,
        Err(_) => prev.to_owned(),
    }
}

pub(crate) fn env_opt_string(key: &str, prev: &Option<String>) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if v.is_empty() => None,
        Ok(v) => Some(v),
        Err(_) => prev.clone(),
    }
}

pub(crate) fn env_parse<T>(key: &str, prev: T) -> T
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, value = %raw, error = %e, "invalid env value, keeping previous");
                prev
            }
        },
        Err(_) => prev,
    }
}

pub(crate) fn env_bool(key: &str, prev: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                tracing::warn!(key, value = other, "invalid boolean env value, keeping previous");
                prev
            }
        },
        Err(_) => prev,
    }
}

/// Comma-separated list.
pub(crate) fn env_list(key: &str, prev: &[String]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => prev.to_vec(),
    }
}
