//! Conversation history — saved user/assistant pairs, one JSONL file per
//! conversation key.
//!
//! A pair is *open* from the turn's first assistant emission until the run
//! summarizes (finalize → persisted exactly once) or aborts (cancel → never
//! persisted). Open pairs live only in memory, so a crash mid-turn persists
//! nothing — crash recovery replays from the message cache instead.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sentra_domain::{ConversationKey, Error, Result};

use crate::sanitize_key;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pair
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPair {
    pub pair_id: Uuid,
    pub user_xml: String,
    pub assistant_xml: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl ConversationPair {
    fn new(user_xml: String) -> Self {
        Self {
            pair_id: Uuid::new_v4(),
            user_xml,
            assistant_xml: String::new(),
            created_at: Utc::now(),
            saved_at: None,
        }
    }
}

struct OpenPair {
    key: ConversationKey,
    pair: ConversationPair,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HistoryStore {
    base_dir: PathBuf,
    open: Mutex<HashMap<Uuid, OpenPair>>,
    /// Serializes file rewrites; appends are single-writer per process.
    io_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            open: Mutex::new(HashMap::new()),
            io_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &ConversationKey) -> PathBuf {
        self.base_dir.join(format!("{}.jsonl", sanitize_key(key.as_str())))
    }

    /// Open a pair for this turn. Nothing is persisted yet.
    pub fn begin_pair(&self, key: &ConversationKey, user_xml: impl Into<String>) -> Uuid {
        let pair = ConversationPair::new(user_xml.into());
        let pair_id = pair.pair_id;
        self.open
            .lock()
            .insert(pair_id, OpenPair { key: key.clone(), pair });
        pair_id
    }

    /// Append assistant output to an open pair. Unknown ids are ignored
    /// (the pair was cancelled concurrently).
    pub fn append_assistant(&self, pair_id: &Uuid, text: &str) {
        if let Some(open) = self.open.lock().get_mut(pair_id) {
            if !open.pair.assistant_xml.is_empty() {
                open.pair.assistant_xml.push('\n');
            }
            open.pair.assistant_xml.push_str(text);
        }
    }

    /// Persist an open pair. Returns `false` when the pair is unknown
    /// (already finalized or cancelled) — a pair is saved at most once.
    pub fn finalize_pair(&self, pair_id: &Uuid) -> Result<bool> {
        let open = match self.open.lock().remove(pair_id) {
            Some(o) => o,
            None => return Ok(false),
        };
        let mut pair = open.pair;
        pair.saved_at = Some(Utc::now());
        self.append(&open.key, &pair)?;
        Ok(true)
    }

    /// Drop an open pair without persisting. Idempotent.
    pub fn cancel_pair(&self, pair_id: &Uuid) {
        self.open.lock().remove(pair_id);
    }

    pub fn has_open_pair(&self, pair_id: &Uuid) -> bool {
        self.open.lock().contains_key(pair_id)
    }

    /// Record a message that was heard but not replied to: persisted
    /// immediately as a pair with an empty assistant side, so later prompts
    /// still see it.
    pub fn record_unreplied(&self, key: &ConversationKey, user_xml: &str) -> Result<()> {
        let mut pair = ConversationPair::new(user_xml.to_owned());
        pair.saved_at = Some(Utc::now());
        self.append(key, &pair)
    }

    fn append(&self, key: &ConversationKey, pair: &ConversationPair) -> Result<()> {
        let json = serde_json::to_string(pair)?;
        let _guard = self.io_lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(key))?;
        writeln!(file, "{json}")?;
        Ok(())
    }

    /// The last `n` saved pairs for a conversation, oldest first.
    pub fn recent_pairs(&self, key: &ConversationKey, n: usize) -> Result<Vec<ConversationPair>> {
        let all = self.load_all(key)?;
        let skip = all.len().saturating_sub(n);
        Ok(all.into_iter().skip(skip).collect())
    }

    pub fn pair_count(&self, key: &ConversationKey) -> Result<usize> {
        Ok(self.load_all(key)?.len())
    }

    /// Discard pairs beyond `max_pairs`, oldest first, rewriting the file
    /// atomically. Returns the discarded pairs (context-memory feedstock).
    pub fn trim(&self, key: &ConversationKey, max_pairs: usize) -> Result<Vec<ConversationPair>> {
        let all = self.load_all(key)?;
        if all.len() <= max_pairs {
            return Ok(Vec::new());
        }
        let cut = all.len() - max_pairs;
        let (discarded, kept) = all.split_at(cut);

        let mut buf = String::new();
        for pair in kept {
            buf.push_str(&serde_json::to_string(pair)?);
            buf.push('\n');
        }
        let _guard = self.io_lock.lock();
        crate::write_atomic(&self.path_for(key), &buf).map_err(Error::Io)?;
        Ok(discarded.to_vec())
    }

    fn load_all(&self, key: &ConversationKey) -> Result<Vec<ConversationPair>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut pairs = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConversationPair>(line) {
                Ok(p) => pairs.push(p),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping malformed history line");
                }
            }
        }
        Ok(pairs)
    }
}
