//! Orchestration for opening a practice session.
//!
//! Opening a session loads config, catalog and progress, reconciles progress
//! with the catalog and decides where the cursor starts. Nothing is watched or
//! checked yet; the engine takes over from the returned [`Session`].

use tracing::{debug, info, warn};

use crate::core::selector::first_open;
use crate::error::StartupError;
use crate::exercise::ExerciseCollection;
use crate::io::catalog::load_catalog;
use crate::io::config::{TrainerConfig, load_config};
use crate::io::init::TrainerPaths;
use crate::io::progress_store::ProgressStore;

/// Options for `open_session`.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Start on the exercise focused last time, if it still exists.
    pub restore_focus: bool,
    /// Discard persisted progress (readable or not) and start over.
    pub fresh: bool,
}

/// Everything the engine needs to run.
#[derive(Debug)]
pub struct Session {
    pub paths: TrainerPaths,
    pub config: TrainerConfig,
    pub collection: ExerciseCollection,
    pub store: ProgressStore,
    /// `None` when every exercise is done or skipped.
    pub cursor: Option<String>,
}

impl Session {
    pub fn is_complete(&self) -> bool {
        self.cursor.is_none()
    }
}

/// Open the session rooted at `paths`.
///
/// Catalog and store problems are fatal and reported as distinct
/// [`StartupError`] variants.
pub fn open_session(paths: &TrainerPaths, options: &SessionOptions) -> Result<Session, StartupError> {
    debug!(root = %paths.root.display(), "opening session");
    let config = load_config(&paths.config_path).map_err(StartupError::Config)?;
    let collection = load_catalog(&paths.catalog_path, &paths.exercises_dir, &paths.tests_dir)?;

    let mut store = ProgressStore::new(&paths.progress_path);
    if options.fresh {
        warn!(path = %paths.progress_path.display(), "starting fresh, discarding progress");
        store.reset().map_err(StartupError::Store)?;
    } else {
        store.load().map_err(StartupError::Store)?;
    }
    store.reconcile(&collection);
    store.persist().map_err(StartupError::Store)?;

    let restored = options
        .restore_focus
        .then(|| store.last_focus())
        .flatten()
        .filter(|id| collection.contains(id))
        .map(str::to_string);
    let cursor = match restored {
        Some(id) => Some(id),
        None => first_open(&collection, store.record()).map(|ex| ex.id.clone()),
    };
    if cursor.is_some() {
        store
            .set_last_focus(cursor.as_deref())
            .map_err(StartupError::Store)?;
    }

    info!(
        exercises = collection.len(),
        cursor = cursor.as_deref().unwrap_or("<complete>"),
        "session opened"
    );
    Ok(Session {
        paths: paths.clone(),
        config,
        collection,
        store,
        cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::core::types::ExerciseStatus;
    use crate::test_support::TestWorkspace;

    #[test]
    fn first_run_starts_at_first_exercise() {
        let ws = TestWorkspace::new(&["ex01", "ex02"]);
        let session = open_session(ws.paths(), &SessionOptions::default()).expect("open");
        assert_eq!(session.cursor.as_deref(), Some("ex01"));
        assert_eq!(session.store.status("ex02"), ExerciseStatus::Pending);
        assert!(ws.paths().progress_path.is_file());
    }

    #[test]
    fn cursor_is_first_pending_or_failed() {
        let ws = TestWorkspace::new(&["ex01", "ex02", "ex03"]);
        let mut store = ProgressStore::new(&ws.paths().progress_path);
        store.apply("ex01", ExerciseStatus::Done, None).expect("apply");
        store.apply("ex02", ExerciseStatus::Skipped, None).expect("apply");

        let session = open_session(ws.paths(), &SessionOptions::default()).expect("open");
        assert_eq!(session.cursor.as_deref(), Some("ex03"));
    }

    #[test]
    fn restore_focus_uses_last_focus() {
        let ws = TestWorkspace::new(&["ex01", "ex02", "ex03"]);
        let mut store = ProgressStore::new(&ws.paths().progress_path);
        store.set_last_focus(Some("ex03")).expect("focus");

        let options = SessionOptions {
            restore_focus: true,
            ..SessionOptions::default()
        };
        let session = open_session(ws.paths(), &options).expect("open");
        assert_eq!(session.cursor.as_deref(), Some("ex03"));

        let plain = open_session(ws.paths(), &SessionOptions::default()).expect("open");
        assert_eq!(plain.cursor.as_deref(), Some("ex01"));
    }

    #[test]
    fn all_settled_session_is_complete() {
        let ws = TestWorkspace::new(&["ex01", "ex02"]);
        let mut store = ProgressStore::new(&ws.paths().progress_path);
        store.apply("ex01", ExerciseStatus::Done, None).expect("apply");
        store.apply("ex02", ExerciseStatus::Done, None).expect("apply");

        let session = open_session(ws.paths(), &SessionOptions::default()).expect("open");
        assert!(session.is_complete());
    }

    #[test]
    fn corrupt_store_is_a_store_error_unless_fresh() {
        let ws = TestWorkspace::new(&["ex01"]);
        fs::create_dir_all(&ws.paths().state_dir).expect("mkdir");
        fs::write(&ws.paths().progress_path, "not json").expect("write");

        let err = open_session(ws.paths(), &SessionOptions::default()).unwrap_err();
        assert!(matches!(&err, StartupError::Store(inner) if inner.is_corrupt()), "{err}");
        assert!(err.to_string().contains("--fresh"));

        let options = SessionOptions {
            fresh: true,
            ..SessionOptions::default()
        };
        let session = open_session(ws.paths(), &options).expect("fresh open");
        assert_eq!(session.cursor.as_deref(), Some("ex01"));
    }

    #[test]
    fn bad_catalog_is_a_catalog_error() {
        let ws = TestWorkspace::new(&["ex01"]);
        fs::write(&ws.paths().catalog_path, "[[exercises]]\nid = \"ex01\"\n").expect("write");
        let err = open_session(ws.paths(), &SessionOptions::default()).unwrap_err();
        assert!(matches!(err, StartupError::Catalog(_)), "{err}");
    }

    #[test]
    fn removed_exercises_are_dropped_from_progress() {
        let ws = TestWorkspace::new(&["ex01"]);
        let mut store = ProgressStore::new(&ws.paths().progress_path);
        store.apply("retired", ExerciseStatus::Done, None).expect("apply");

        let session = open_session(ws.paths(), &SessionOptions::default()).expect("open");
        assert!(session.store.entry("retired").is_none());
        let reloaded = ProgressStore::open(&ws.paths().progress_path).expect("reopen");
        assert!(reloaded.entry("retired").is_none());
    }
}
