//! Latest inbound message per run id, kept for crash recovery: if the
//! process dies mid-run, the recovery scheduler can reconstruct what the
//! user asked from this cache.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use sentra_domain::{Error, IncomingMessage, Result};

use crate::{sanitize_key, write_atomic};

pub struct MessageCache {
    base_dir: PathBuf,
    io_lock: Mutex<()>,
}

impl MessageCache {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self { base_dir: base_dir.to_path_buf(), io_lock: Mutex::new(()) })
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", sanitize_key(run_id)))
    }

    pub fn put(&self, run_id: &str, msg: &IncomingMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        let _guard = self.io_lock.lock();
        write_atomic(&self.path_for(run_id), &json).map_err(Error::Io)
    }

    pub fn get(&self, run_id: &str) -> Result<Option<IncomingMessage>> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Idempotent.
    pub fn remove(&self, run_id: &str) {
        let _guard = self.io_lock.lock();
        let _ = std::fs::remove_file(self.path_for(run_id));
    }
}
