//! Preset / worldbook / base-template snapshots.
//!
//! Loaded from the data directory and swapped copy-on-reload: readers take
//! the `Arc` pointer once and proceed; a reload never mutates a snapshot in
//! place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use sentra_domain::Result;

/// The four built-in base templates, used when no file overrides them.
const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "auto",
        "You are Sentra, a conversational companion. Decide freely whether to \
         use tools. Always wrap your final reply in <sentra-response></sentra-response>.",
    ),
    (
        "router",
        "You are Sentra. Route the request: answer directly when you can, \
         plan tool use when you cannot. Wrap the reply in <sentra-response></sentra-response>.",
    ),
    (
        "response_only",
        "You are Sentra. Answer directly without tools. Wrap the reply in \
         <sentra-response></sentra-response>.",
    ),
    (
        "tools_only",
        "You are Sentra. Complete the task with tools before answering. Wrap \
         the final reply in <sentra-response></sentra-response>.",
    ),
];

#[derive(Debug, Clone, Default)]
pub struct Overlays {
    pub preset_xml: Option<String>,
    pub worldbook_xml: Option<String>,
    pub base_templates: HashMap<String, String>,
}

pub struct OverlayStore {
    dir: PathBuf,
    current: RwLock<Arc<Overlays>>,
}

impl OverlayStore {
    /// Load from `dir` (`preset.xml`, `worldbook.xml`, `templates/*.txt`).
    /// Missing files are fine; built-in templates fill the gaps.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let store = Self {
            dir: dir.to_path_buf(),
            current: RwLock::new(Arc::new(Overlays::default())),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn snapshot(&self) -> Arc<Overlays> {
        self.current.read().clone()
    }

    /// Re-read everything and swap the snapshot.
    pub fn reload(&self) -> Result<()> {
        let mut overlays = Overlays::default();

        overlays.preset_xml = read_optional(&self.dir.join("preset.xml"));
        overlays.worldbook_xml = read_optional(&self.dir.join("worldbook.xml"));

        for (name, text) in BUILTIN_TEMPLATES {
            overlays
                .base_templates
                .insert((*name).to_owned(), (*text).to_owned());
        }
        let templates_dir = self.dir.join("templates");
        if templates_dir.is_dir() {
            for entry in std::fs::read_dir(&templates_dir)?.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                    continue;
                }
                if let (Some(stem), Some(text)) = (
                    path.file_stem().and_then(|s| s.to_str()),
                    read_optional(&path),
                ) {
                    overlays.base_templates.insert(stem.to_owned(), text);
                }
            }
        }

        *self.current.write() = Arc::new(overlays);
        Ok(())
    }

    /// The named base template, falling back to `auto`.
    pub fn base_template(&self, name: &str) -> String {
        let snapshot = self.snapshot();
        snapshot
            .base_templates
            .get(name)
            .or_else(|| snapshot.base_templates.get("auto"))
            .cloned()
            .unwrap_or_default()
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Ok(_) => None,
        Err(_) => None,
    }
}
