//! Durable state owned by the agent: conversation history, user personas,
//! the per-run message cache, the delay queue, task-recovery journals, and
//! context-memory digests.
//!
//! All stores are plain files under one data directory, written with
//! append-or-atomic-rename discipline, so a crashed process resumes from
//! what is on disk.

pub mod context_memory;
pub mod delay_queue;
pub mod history;
pub mod message_cache;
pub mod persona;
pub mod recovery;

pub use context_memory::ContextMemoryStore;
pub use delay_queue::{DelayQueue, DelayedJob};
pub use history::{ConversationPair, HistoryStore};
pub use message_cache::MessageCache;
pub use persona::PersonaStore;
pub use recovery::{RecoveryJournal, TaskRecoveryRecord};

/// Conversation keys contain `:`; file names must not.
pub(crate) fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Write a file atomically: write a `.tmp` sibling, then rename over the
/// target. On rename failure the temp file is removed and the error
/// propagates; the target is never left half-written.
pub(crate) fn write_atomic(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    match std::fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}
