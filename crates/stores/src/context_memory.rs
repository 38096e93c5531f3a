//! Daily context-memory digests.
//!
//! When history trimming discards old pairs, their rendered text queues up
//! here; once enough accumulate, the pipeline summarizes them into a dated
//! digest. The last few digests are injected into the system prompt as a
//! `<sentra-context-memory>` block.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use sentra_domain::{ConversationKey, Error, Result};

use crate::{sanitize_key, write_atomic};

/// Digests injected into one prompt.
const MAX_INJECTED_DIGESTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub date: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct MemoryDoc {
    #[serde(default)]
    pending: Vec<String>,
    #[serde(default)]
    digests: Vec<Digest>,
}

pub struct ContextMemoryStore {
    base_dir: PathBuf,
    io_lock: Mutex<()>,
}

impl ContextMemoryStore {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self { base_dir: base_dir.to_path_buf(), io_lock: Mutex::new(()) })
    }

    fn path_for(&self, key: &ConversationKey) -> PathBuf {
        self.base_dir.join(format!("{}.json", sanitize_key(key.as_str())))
    }

    fn load(&self, key: &ConversationKey) -> Result<MemoryDoc> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(MemoryDoc::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, key: &ConversationKey, doc: &MemoryDoc) -> Result<()> {
        let json = serde_json::to_string_pretty(doc)?;
        let _guard = self.io_lock.lock();
        write_atomic(&self.path_for(key), &json).map_err(Error::Io)
    }

    /// Queue discarded-pair texts. Returns the pending count afterwards.
    pub fn push_discarded(&self, key: &ConversationKey, texts: &[String]) -> Result<usize> {
        if texts.is_empty() {
            return Ok(self.load(key)?.pending.len());
        }
        let mut doc = self.load(key)?;
        doc.pending.extend(texts.iter().cloned());
        let count = doc.pending.len();
        self.save(key, &doc)?;
        Ok(count)
    }

    /// Take the queued texts for summarization, clearing the queue.
    pub fn drain_pending(&self, key: &ConversationKey) -> Result<Vec<String>> {
        let mut doc = self.load(key)?;
        let pending = std::mem::take(&mut doc.pending);
        if !pending.is_empty() {
            self.save(key, &doc)?;
        }
        Ok(pending)
    }

    /// Append a digest under today's date (or merge into it).
    pub fn add_digest(&self, key: &ConversationKey, date: &str, text: &str) -> Result<()> {
        let mut doc = self.load(key)?;
        if let Some(existing) = doc.digests.iter_mut().find(|d| d.date == date) {
            existing.text.push('\n');
            existing.text.push_str(text);
            existing.created_at = Utc::now();
        } else {
            doc.digests.push(Digest {
                date: date.to_owned(),
                text: text.to_owned(),
                created_at: Utc::now(),
            });
        }
        self.save(key, &doc)
    }

    /// The prompt block for this conversation, or `None` when empty.
    pub fn render_xml(&self, key: &ConversationKey) -> Result<Option<String>> {
        let doc = self.load(key)?;
        if doc.digests.is_empty() {
            return Ok(None);
        }
        let start = doc.digests.len().saturating_sub(MAX_INJECTED_DIGESTS);
        let mut out = String::from("<sentra-context-memory>\n");
        for digest in &doc.digests[start..] {
            out.push_str(&format!("<day date=\"{}\">{}</day>\n", digest.date, digest.text));
        }
        out.push_str("</sentra-context-memory>");
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ContextMemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextMemoryStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn key() -> ConversationKey {
        ConversationKey::group("g1")
    }

    #[test]
    fn pending_accumulates_and_drains() {
        let (_d, store) = store();
        assert_eq!(store.push_discarded(&key(), &["a".into()]).unwrap(), 1);
        assert_eq!(store.push_discarded(&key(), &["b".into(), "c".into()]).unwrap(), 3);

        let drained = store.drain_pending(&key()).unwrap();
        assert_eq!(drained, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert!(store.drain_pending(&key()).unwrap().is_empty());
    }

    #[test]
    fn digests_merge_within_a_day() {
        let (_d, store) = store();
        store.add_digest(&key(), "2024-06-15", "morning talk").unwrap();
        store.add_digest(&key(), "2024-06-15", "evening talk").unwrap();

        let xml = store.render_xml(&key()).unwrap().unwrap();
        assert!(xml.contains("morning talk\nevening talk"));
        assert_eq!(xml.matches("<day").count(), 1);
    }

    #[test]
    fn render_caps_injected_digests() {
        let (_d, store) = store();
        for i in 0..5 {
            store.add_digest(&key(), &format!("2024-06-1{i}"), "t").unwrap();
        }
        let xml = store.render_xml(&key()).unwrap().unwrap();
        assert_eq!(xml.matches("<day").count(), MAX_INJECTED_DIGESTS);
        assert!(xml.contains("2024-06-14"), "newest digests are kept");
        assert!(!xml.contains("2024-06-10"));
    }

    #[test]
    fn empty_store_renders_none() {
        let (_d, store) = store();
        assert!(store.render_xml(&key()).unwrap().is_none());
    }
}
