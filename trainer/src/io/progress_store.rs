//! Durable progress record (`.trainer/progress.json`).

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::write_atomic;
use crate::core::types::{ExerciseStatus, ProgressEntry, ProgressRecord};
use crate::error::StoreError;
use crate::exercise::ExerciseCollection;

/// Current on-disk format version.
pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    last_focus: Option<String>,
    #[serde(default)]
    exercises: BTreeMap<String, ProgressEntry>,
}

fn default_version() -> u32 {
    STORE_VERSION
}

/// What `reconcile` changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Catalog exercises that had no entry and were added as `Pending`.
    pub added: Vec<String>,
    /// Stored entries whose exercise is no longer in the catalog.
    pub dropped: Vec<String>,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty()
    }
}

/// Owns the progress record and writes it through on every mutation.
///
/// Only the engine thread holds a store; everyone else reads snapshots.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    record: ProgressRecord,
    last_focus: Option<String>,
}

impl ProgressStore {
    /// An empty store bound to `path`. Nothing is read or written yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            record: ProgressRecord::new(),
            last_focus: None,
        }
    }

    /// Bind to `path` and load whatever is persisted there.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let mut store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory record with the persisted one.
    ///
    /// A missing file is a first run and yields an empty record. Entries stored
    /// as `Running` were interrupted mid-check and come back as `Pending`.
    pub fn load(&mut self) -> Result<ProgressRecord, StoreError> {
        debug!(path = %self.path.display(), "loading progress");
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.record = ProgressRecord::new();
                self.last_focus = None;
                return Ok(self.snapshot());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    action: "read",
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let file: StoreFile =
            serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        if file.version > STORE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: self.path.clone(),
                version: file.version,
            });
        }

        let mut record = file.exercises;
        for entry in record.values_mut() {
            if entry.status == ExerciseStatus::Running {
                entry.status = ExerciseStatus::Pending;
            }
        }
        debug!(entries = record.len(), last_focus = ?file.last_focus, "progress loaded");
        self.record = record;
        self.last_focus = file.last_focus;
        Ok(self.snapshot())
    }

    /// Overwrite the entry for `id` and persist before returning.
    ///
    /// `checked_at` is stamped for `Done`/`Failed`; other statuses keep the
    /// previous timestamp. The in-memory record is updated even when the
    /// write fails.
    pub fn apply(
        &mut self,
        id: &str,
        status: ExerciseStatus,
        diagnostic: Option<String>,
    ) -> Result<(), StoreError> {
        let previous_checked_at = self.record.get(id).and_then(|entry| entry.checked_at);
        let checked_at = match status {
            ExerciseStatus::Done | ExerciseStatus::Failed => Some(Utc::now()),
            _ => previous_checked_at,
        };
        self.record.insert(
            id.to_string(),
            ProgressEntry {
                status,
                checked_at,
                diagnostic,
            },
        );
        self.persist()
    }

    pub fn snapshot(&self) -> ProgressRecord {
        self.record.clone()
    }

    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    pub fn entry(&self, id: &str) -> Option<&ProgressEntry> {
        self.record.get(id)
    }

    pub fn status(&self, id: &str) -> ExerciseStatus {
        self.entry(id).map(|entry| entry.status).unwrap_or_default()
    }

    /// Align the record with `collection` in memory: missing exercises become
    /// `Pending`, exercises no longer in the catalog are dropped.
    pub fn reconcile(&mut self, collection: &ExerciseCollection) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        self.record.retain(|id, _| {
            let keep = collection.contains(id);
            if !keep {
                summary.dropped.push(id.clone());
            }
            keep
        });
        for exercise in collection {
            if !self.record.contains_key(&exercise.id) {
                self.record
                    .insert(exercise.id.clone(), ProgressEntry::pending());
                summary.added.push(exercise.id.clone());
            }
        }
        if self
            .last_focus
            .as_deref()
            .is_some_and(|id| !collection.contains(id))
        {
            self.last_focus = None;
        }
        if !summary.is_empty() {
            info!(
                added = summary.added.len(),
                dropped = summary.dropped.len(),
                "progress reconciled with catalog"
            );
        }
        summary
    }

    pub fn last_focus(&self) -> Option<&str> {
        self.last_focus.as_deref()
    }

    /// Remember the focused exercise; persists only when it changes.
    pub fn set_last_focus(&mut self, id: Option<&str>) -> Result<(), StoreError> {
        if self.last_focus.as_deref() == id {
            return Ok(());
        }
        self.last_focus = id.map(str::to_string);
        self.persist()
    }

    /// Delete the persisted file and clear the in-memory record.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "progress reset"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::Io {
                    action: "delete",
                    path: self.path.clone(),
                    source,
                });
            }
        }
        self.record.clear();
        self.last_focus = None;
        Ok(())
    }

    /// Write the whole record atomically (temp file + rename).
    pub fn persist(&self) -> Result<(), StoreError> {
        let file = StoreFileRef {
            version: STORE_VERSION,
            last_focus: self.last_focus.as_deref(),
            exercises: &self.record,
        };
        let mut buf = serde_json::to_string_pretty(&file).map_err(StoreError::Serialize)?;
        buf.push('\n');
        write_atomic(&self.path, &buf).map_err(|source| StoreError::Io {
            action: "write",
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), entries = self.record.len(), "progress written");
        Ok(())
    }
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    last_focus: Option<&'a str>,
    exercises: &'a ProgressRecord,
}
