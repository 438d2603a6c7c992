//! Mapping of changed filesystem paths to exercise ids.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::exercise::ExerciseCollection;

/// Resolves paths reported by the watcher to the exercise that owns them.
#[derive(Debug, Clone)]
pub struct ExercisePathMap {
    root: PathBuf,
    by_relative: HashMap<PathBuf, String>,
}

impl ExercisePathMap {
    /// Build a map for exercises living under `root` (the exercises directory).
    pub fn new(root: impl Into<PathBuf>, collection: &ExerciseCollection) -> Self {
        let by_relative = collection
            .iter()
            .map(|ex| (normalize_relative(&ex.path), ex.id.clone()))
            .collect();
        Self {
            root: root.into(),
            by_relative,
        }
    }

    /// The exercise owning `path`, or `None` for files outside any exercise.
    ///
    /// Accepts absolute paths under the root and paths relative to it.
    pub fn resolve(&self, path: &Path) -> Option<&str> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root).ok()?
        } else {
            path
        };
        self.by_relative
            .get(&normalize_relative(relative))
            .map(String::as_str)
    }
}

/// Drop `.` components so `./a/b.py` and `a/b.py` compare equal.
pub(crate) fn normalize_relative(path: &Path) -> PathBuf {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}
