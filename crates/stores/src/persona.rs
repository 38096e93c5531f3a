//! Per-user persona documents.
//!
//! Each user gets one JSON file holding their derived persona XML plus the
//! recent message samples the derivation runs on. Sampling cadence and
//! retention come from `PersonaConfig`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use sentra_domain::config::PersonaConfig;
use sentra_domain::{Error, Result};

use crate::{sanitize_key, write_atomic};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaDoc {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_xml: Option<String>,
    #[serde(default)]
    pub samples: Vec<String>,
    /// Samples recorded since the persona was last derived.
    #[serde(default)]
    pub samples_since_update: usize,
    pub updated_at: DateTime<Utc>,
}

impl PersonaDoc {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            persona_xml: None,
            samples: Vec::new(),
            samples_since_update: 0,
            updated_at: Utc::now(),
        }
    }
}

pub struct PersonaStore {
    base_dir: PathBuf,
    io_lock: Mutex<()>,
}

impl PersonaStore {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self { base_dir: base_dir.to_path_buf(), io_lock: Mutex::new(()) })
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", sanitize_key(user_id)))
    }

    pub fn load(&self, user_id: &str) -> Result<Option<PersonaDoc>> {
        let path = self.path_for(user_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Record one message sample. Returns `true` when enough samples
    /// accumulated that the persona should be re-derived.
    pub fn record_sample(
        &self,
        user_id: &str,
        text: &str,
        cfg: &PersonaConfig,
    ) -> Result<bool> {
        if !cfg.enabled {
            return Ok(false);
        }
        let mut doc = self.load(user_id)?.unwrap_or_else(|| PersonaDoc::new(user_id));
        doc.samples.push(text.to_owned());
        if doc.samples.len() > cfg.max_samples {
            let cut = doc.samples.len() - cfg.max_samples;
            doc.samples.drain(..cut);
        }
        doc.samples_since_update += 1;
        doc.updated_at = Utc::now();
        let due = doc.samples_since_update >= cfg.update_every;
        self.save(&doc)?;
        Ok(due)
    }

    /// Store a freshly derived persona and reset the cadence counter.
    pub fn set_persona_xml(&self, user_id: &str, xml: &str) -> Result<()> {
        let mut doc = self.load(user_id)?.unwrap_or_else(|| PersonaDoc::new(user_id));
        doc.persona_xml = Some(xml.to_owned());
        doc.samples_since_update = 0;
        doc.updated_at = Utc::now();
        self.save(&doc)
    }

    pub fn persona_xml(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.load(user_id)?.and_then(|d| d.persona_xml))
    }

    pub fn samples(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self.load(user_id)?.map(|d| d.samples).unwrap_or_default())
    }

    fn save(&self, doc: &PersonaDoc) -> Result<()> {
        let json = serde_json::to_string_pretty(doc)?;
        let _guard = self.io_lock.lock();
        write_atomic(&self.path_for(&doc.user_id), &json).map_err(Error::Io)
    }
}
