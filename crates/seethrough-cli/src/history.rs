//! Local scan history
//!
//! Entries are kept newest first and capped; the file is rewritten on every
//! change.

use anyhow::Context;
use chrono::{DateTime, Utc};
use seethrough_core::DetectionResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One recorded analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub image_url: String,
    pub result: DetectionResult,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(image_url: impl Into<String>, result: DetectionResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            image_url: image_url.into(),
            result,
            timestamp: Utc::now(),
        }
    }
}

/// Scan history persisted as a JSON array
#[derive(Debug)]
pub struct ScanHistory {
    path: PathBuf,
    max_entries: usize,
    entries: Vec<HistoryEntry>,
}

impl ScanHistory {
    /// Open the history at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(raw) => match serde_json::from_slice::<Vec<HistoryEntry>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring unreadable history {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        let mut history = Self {
            path,
            max_entries,
            entries,
        };
        history.entries.truncate(max_entries);
        history
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries, newest first
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record an entry and persist
    pub fn record(&mut self, entry: HistoryEntry) -> anyhow::Result<()> {
        self.entries.insert(0, entry);
        self.entries.truncate(self.max_entries);
        self.save()
    }

    /// Drop every entry and persist
    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.entries.clear();
        self.save()
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        debug!("Saved {} history entries", self.entries.len());
        Ok(())
    }
}
