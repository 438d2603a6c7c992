//! Pristine exercise copies used by reset.

use std::fs;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::init::TrainerPaths;
use crate::exercise::{Exercise, ExerciseCollection};

/// What a restore actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreResult {
    Restored,
    /// No backup exists for the exercise; the file was left alone.
    NoBackup,
}

/// Puts an exercise file back to its original content.
pub trait Restore: Send {
    fn restore(&self, exercise: &Exercise) -> Result<RestoreResult>;
}

/// Restores from `.trainer/backups/<path>`, written by `trainer init`.
#[derive(Debug, Clone)]
pub struct BackupRestorer {
    paths: TrainerPaths,
}

impl BackupRestorer {
    pub fn new(paths: TrainerPaths) -> Self {
        Self { paths }
    }
}

impl Restore for BackupRestorer {
    fn restore(&self, exercise: &Exercise) -> Result<RestoreResult> {
        let backup = self.paths.backup_file(&exercise.path);
        if !backup.is_file() {
            debug!(exercise = %exercise.id, "no backup to restore");
            return Ok(RestoreResult::NoBackup);
        }
        let target = self.paths.exercise_file(&exercise.path);
        fs::copy(&backup, &target)
            .with_context(|| format!("copy {} to {}", backup.display(), target.display()))?;
        info!(exercise = %exercise.id, "exercise restored from backup");
        Ok(RestoreResult::Restored)
    }
}

/// Copy every exercise file into the backups directory.
///
/// Existing backups are kept unless `overwrite` is set. Returns the number of
/// files copied.
pub fn snapshot_exercises(
    paths: &TrainerPaths,
    collection: &ExerciseCollection,
    overwrite: bool,
) -> Result<usize> {
    let mut copied = 0;
    for exercise in collection {
        let backup = paths.backup_file(&exercise.path);
        if backup.exists() && !overwrite {
            continue;
        }
        if let Some(parent) = backup.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let source = paths.exercise_file(&exercise.path);
        fs::copy(&source, &backup)
            .with_context(|| format!("back up {}", source.display()))?;
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::parse_catalog;

    fn setup() -> (tempfile::TempDir, TrainerPaths, ExerciseCollection) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TrainerPaths::new(temp.path());
        fs::create_dir_all(&paths.exercises_dir).expect("mkdir");
        fs::write(paths.exercises_dir.join("a.py"), "original\n").expect("write");
        let collection = parse_catalog("[[exercises]]\nid = \"a\"\npath = \"a.py\"\n", "info.toml")
            .expect("catalog");
        (temp, paths, collection)
    }

    #[test]
    fn restore_copies_backup_over_exercise() {
        let (_temp, paths, collection) = setup();
        snapshot_exercises(&paths, &collection, false).expect("snapshot");
        let file = paths.exercise_file(std::path::Path::new("a.py"));
        fs::write(&file, "edited\n").expect("edit");

        let exercise = collection.get("a").expect("exercise");
        let result = BackupRestorer::new(paths.clone()).restore(exercise).expect("restore");

        assert_eq!(result, RestoreResult::Restored);
        assert_eq!(fs::read_to_string(file).expect("read"), "original\n");
    }

    #[test]
    fn restore_without_backup_leaves_file_alone() {
        let (_temp, paths, collection) = setup();
        let exercise = collection.get("a").expect("exercise");
        let result = BackupRestorer::new(paths.clone()).restore(exercise).expect("restore");
        assert_eq!(result, RestoreResult::NoBackup);
    }

    #[test]
    fn snapshot_keeps_existing_backups_unless_overwriting() {
        let (_temp, paths, collection) = setup();
        assert_eq!(snapshot_exercises(&paths, &collection, false).expect("first"), 1);
        assert_eq!(snapshot_exercises(&paths, &collection, false).expect("second"), 0);
        assert_eq!(snapshot_exercises(&paths, &collection, true).expect("forced"), 1);
    }
}
