//! Test-only helpers: collections, scratch workspaces and scripted checkers.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use crate::cancel::CancelToken;
use crate::core::catalog::parse_catalog;
use crate::core::types::{CheckOutcome, CheckStatus, ExerciseStatus, ProgressEntry, ProgressRecord};
use crate::engine::UiEvent;
use crate::exercise::{Exercise, ExerciseCollection, ExerciseMode};
use crate::io::backup::{Restore, RestoreResult};
use crate::io::checker::{CheckRequest, Checker};
use crate::io::config::{TrainerConfig, write_config};
use crate::io::init::TrainerPaths;
use crate::start::{Session, SessionOptions, open_session};

/// Create a collection of `run`-mode exercises at `<id>.py`, in the given order.
pub fn collection(ids: &[&str]) -> ExerciseCollection {
    let exercises = ids
        .iter()
        .enumerate()
        .map(|(index, id)| exercise(id, index as u32 + 1))
        .collect();
    ExerciseCollection::from_validated(exercises)
}

/// Create a deterministic exercise with default fields.
pub fn exercise(id: &str, ordinal: u32) -> Exercise {
    Exercise {
        id: id.to_string(),
        ordinal,
        path: format!("{id}.py").into(),
        name: id.to_string(),
        section: None,
        mode: ExerciseMode::Run,
        hint: Some(format!("hint for {id}")),
        requires_previous: false,
        test: None,
    }
}

/// Create a progress record with the given statuses.
pub fn record(entries: &[(&str, ExerciseStatus)]) -> ProgressRecord {
    entries
        .iter()
        .map(|(id, status)| {
            (
                id.to_string(),
                ProgressEntry {
                    status: *status,
                    ..ProgressEntry::default()
                },
            )
        })
        .collect()
}

/// Create a non-cancelled outcome.
pub fn outcome(id: &str, generation: u64, status: CheckStatus) -> CheckOutcome {
    CheckOutcome {
        exercise_id: id.to_string(),
        generation,
        status,
        output: match status {
            CheckStatus::Passed => String::new(),
            _ => format!("{id} did not pass"),
        },
        elapsed: Duration::from_millis(1),
        cancelled: false,
    }
}

/// Everything currently queued for the UI.
pub fn drain(rx: &Receiver<UiEvent>) -> Vec<UiEvent> {
    rx.try_iter().collect()
}

/// A scratch workspace with `exercises/info.toml` and one file per exercise.
pub struct TestWorkspace {
    _temp: tempfile::TempDir,
    paths: TrainerPaths,
}

impl TestWorkspace {
    /// Exercises `ids` at `<id>.py`, each with hint `hint for <id>`.
    pub fn new(ids: &[&str]) -> Self {
        let catalog: String = ids
            .iter()
            .map(|id| format!("[[exercises]]\nid = \"{id}\"\npath = \"{id}.py\"\nhint = \"hint for {id}\"\n\n"))
            .collect();
        Self::with_catalog(&catalog)
    }

    /// Write `catalog` verbatim and create every file it references.
    pub fn with_catalog(catalog: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TrainerPaths::new(temp.path());
        fs::create_dir_all(&paths.exercises_dir).expect("create exercises dir");
        fs::write(&paths.catalog_path, catalog).expect("write catalog");
        let collection = parse_catalog(catalog, "info.toml").expect("valid test catalog");
        for exercise in &collection {
            let file = paths.exercise_file(&exercise.path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).expect("create exercise dir");
            }
            fs::write(&file, format!("# {}\n", exercise.id)).expect("write exercise");
        }
        Self { _temp: temp, paths }
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &TrainerPaths {
        &self.paths
    }

    pub fn write_config(&self, config: &TrainerConfig) {
        write_config(&self.paths.config_path, config).expect("write config");
    }

    pub fn write_exercise(&self, relative: &str, contents: &str) {
        fs::write(self.paths.exercise_file(Path::new(relative)), contents).expect("write exercise");
    }

    /// Open a session with default options.
    pub fn open(&self) -> Session {
        open_session(&self.paths, &SessionOptions::default()).expect("open session")
    }
}

#[derive(Debug, Default)]
struct Script {
    outcomes: HashMap<String, VecDeque<(CheckStatus, String)>>,
    calls: Vec<(String, u64)>,
}

/// Returns queued outcomes per exercise without spawning processes.
///
/// An exercise with nothing queued comes back `Errored`.
#[derive(Debug, Default)]
pub struct ScriptedChecker {
    script: Mutex<Script>,
}

impl ScriptedChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome for `id`.
    pub fn push(&self, id: &str, status: CheckStatus, output: &str) {
        self.lock()
            .outcomes
            .entry(id.to_string())
            .or_default()
            .push_back((status, output.to_string()));
    }

    pub fn with(self, id: &str, status: CheckStatus) -> Self {
        self.push(id, status, "");
        self
    }

    /// `(id, generation)` of every check so far, in call order.
    pub fn calls(&self) -> Vec<(String, u64)> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Checker for ScriptedChecker {
    fn check(&self, request: &CheckRequest, _cancel: &CancelToken) -> CheckOutcome {
        let id = request.exercise.id.clone();
        let mut script = self.lock();
        script.calls.push((id.clone(), request.generation));
        let (status, output) = script
            .outcomes
            .get_mut(&id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| (CheckStatus::Errored, format!("no scripted outcome for {id}")));
        CheckOutcome {
            exercise_id: id,
            generation: request.generation,
            status,
            output,
            elapsed: Duration::from_millis(1),
            cancelled: false,
        }
    }
}

#[derive(Debug, Default)]
struct HeldState {
    started: Vec<(String, u64)>,
    cancelled: Vec<u64>,
}

/// Blocks every check until it is cancelled, recording what happened.
///
/// Tests drive outcomes by posting `CheckFinished` events themselves, which
/// makes arrival order fully deterministic.
#[derive(Debug, Default)]
pub struct HeldChecker {
    state: Mutex<HeldState>,
}

impl HeldChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until at least `count` checks have started; returns them in order.
    pub fn wait_for_started(&self, count: usize, timeout: Duration) -> Vec<(String, u64)> {
        let _ = poll_until(timeout, || self.lock().started.len() >= count);
        self.lock().started.clone()
    }

    /// Wait until the check stamped `generation` observed its cancellation.
    pub fn wait_for_cancelled(&self, generation: u64, timeout: Duration) -> bool {
        poll_until(timeout, || self.lock().cancelled.contains(&generation)).is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Checker for HeldChecker {
    fn check(&self, request: &CheckRequest, cancel: &CancelToken) -> CheckOutcome {
        self.lock()
            .started
            .push((request.exercise.id.clone(), request.generation));
        let cancelled = cancel.wait_timeout(Duration::from_secs(30));
        if cancelled {
            self.lock().cancelled.push(request.generation);
        }
        CheckOutcome {
            exercise_id: request.exercise.id.clone(),
            generation: request.generation,
            status: CheckStatus::Errored,
            output: "held check released without cancellation".to_string(),
            elapsed: Duration::ZERO,
            cancelled,
        }
    }
}

/// Restore double that records which exercises were restored.
#[derive(Debug, Clone)]
pub struct StubRestore {
    fail: bool,
    restored: Arc<Mutex<Vec<String>>>,
}

impl StubRestore {
    pub fn ok() -> Self {
        Self {
            fail: false,
            restored: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ok()
        }
    }

    pub fn restored(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.restored)
    }
}

impl Restore for StubRestore {
    fn restore(&self, exercise: &Exercise) -> Result<RestoreResult> {
        if self.fail {
            return Err(anyhow!("backup for {} is unreadable", exercise.id));
        }
        self.restored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(exercise.id.clone());
        Ok(RestoreResult::Restored)
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub fn poll_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return Err(anyhow!("condition not met within {timeout:?}"));
        }
        thread::sleep(Duration::from_millis(5));
    }
    Ok(())
}
