//! The progression engine: a single-threaded state machine over one event queue.
//!
//! Edits, commands and worker completions all arrive as [`EngineEvent`]s and
//! are handled one at a time on the engine thread. Checks run on worker
//! threads; each is stamped with a generation so that only the newest check
//! of an exercise may commit, whatever order outcomes arrive in.
//!
//! At most one exercise is checked at a time. A new edit to the exercise being
//! checked supersedes that check; edits to other exercises wait in arrival
//! order until it settles.

mod events;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

pub use self::events::{Command, CommandAck, CommandResult, EngineEvent, EngineHandle, UiEvent};
use crate::cancel::CancelToken;
use crate::core::diagnostic::diagnostic_for;
use crate::core::generation::GenerationTracker;
use crate::core::selector::{blocking_predecessor, next_unsettled, run_all_targets};
use crate::core::types::{CheckOutcome, CheckStatus, ExerciseStatus, ProgressEntry, ProgressRecord};
use crate::error::CommandRejected;
use crate::exercise::{Exercise, ExerciseCollection};
use crate::io::backup::Restore;
use crate::io::checker::{CheckRequest, Checker};
use crate::io::config::{RunAllScope, TrainerConfig};
use crate::io::progress_store::ProgressStore;
use crate::start::Session;

/// Bound on queued events before producers block.
pub const QUEUE_CAPACITY: usize = 256;

/// Engine knobs taken from config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub check_timeout: Duration,
    pub run_all_scope: RunAllScope,
    pub continue_on_failure: bool,
}

impl EngineSettings {
    pub fn from_config(config: &TrainerConfig) -> Self {
        Self {
            check_timeout: config.check_timeout(),
            run_all_scope: config.run_all.scope,
            continue_on_failure: config.run_all.continue_on_failure,
        }
    }
}

/// Whether the loop should keep going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    cancel: CancelToken,
}

#[derive(Debug, Default)]
struct RunAllBatch {
    queue: VecDeque<String>,
    current: Option<String>,
    checked: Vec<String>,
    failed: Vec<String>,
}

pub struct Engine<C> {
    collection: ExerciseCollection,
    store: ProgressStore,
    checker: Arc<C>,
    restorer: Box<dyn Restore>,
    settings: EngineSettings,
    generations: GenerationTracker,
    inflight: HashMap<String, InFlight>,
    /// `None` once every exercise is settled.
    cursor: Option<String>,
    complete: bool,
    run_all: Option<RunAllBatch>,
    /// Checks waiting for the one in flight or for a run-all batch, in arrival order.
    deferred: VecDeque<String>,
    quitting: bool,
    tx: SyncSender<EngineEvent>,
    rx: Receiver<EngineEvent>,
    ui: Sender<UiEvent>,
}

impl<C: Checker + 'static> Engine<C> {
    pub fn new(
        session: Session,
        checker: Arc<C>,
        restorer: Box<dyn Restore>,
        ui: Sender<UiEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        let complete = session.cursor.is_none();
        Self {
            settings: EngineSettings::from_config(&session.config),
            collection: session.collection,
            store: session.store,
            checker,
            restorer,
            generations: GenerationTracker::new(),
            inflight: HashMap::new(),
            cursor: session.cursor,
            complete,
            run_all: None,
            deferred: VecDeque::new(),
            quitting: false,
            tx,
            rx,
            ui,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.tx.clone())
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn status(&self, id: &str) -> ExerciseStatus {
        self.store.status(id)
    }

    pub fn entry(&self, id: &str) -> Option<&ProgressEntry> {
        self.store.entry(id)
    }

    pub fn snapshot(&self) -> ProgressRecord {
        self.store.snapshot()
    }

    pub fn collection(&self) -> &ExerciseCollection {
        &self.collection
    }

    pub fn run_all_active(&self) -> bool {
        self.run_all.is_some()
    }

    pub fn is_checking(&self, id: &str) -> bool {
        self.inflight.contains_key(id)
    }

    /// Block on the queue until `Quit`, then cancel outstanding checks.
    ///
    /// Returns the final progress snapshot.
    pub fn run(mut self) -> ProgressRecord {
        info!(cursor = ?self.cursor, exercises = self.collection.len(), "engine running");
        while let Ok(event) = self.rx.recv() {
            if self.handle_event(event) == Flow::Quit {
                break;
            }
        }
        if !self.quitting {
            self.shutdown();
        }
        self.store.snapshot()
    }

    /// Handle the next queued event, waiting at most `timeout` for one.
    pub fn process_next(&mut self, timeout: Duration) -> Option<Flow> {
        let event = self.rx.recv_timeout(timeout).ok()?;
        Some(self.handle_event(event))
    }

    pub fn handle_event(&mut self, event: EngineEvent) -> Flow {
        match event {
            EngineEvent::Changed(id) => self.on_changed(&id),
            EngineEvent::Command { command, reply } => {
                let result = self.execute(command);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            EngineEvent::CheckFinished(outcome) => self.on_outcome(outcome),
        }
        if self.quitting { Flow::Quit } else { Flow::Continue }
    }

    /// Apply a command and return its synchronous reply.
    #[instrument(skip(self), level = "debug")]
    pub fn execute(&mut self, command: Command) -> CommandResult {
        if self.quitting {
            return Err(CommandRejected::ShuttingDown);
        }
        match command {
            Command::Hint(id) => Ok(CommandAck::Hint(self.exercise(&id)?.hint.clone())),
            Command::Skip(id) => self.skip(&id),
            Command::Unskip(id) => self.unskip(&id),
            Command::ResetExercise(id) => self.reset(&id),
            Command::RunAll => self.start_run_all(),
            Command::Check(id) => {
                self.exercise(&id)?;
                self.request_check(&id);
                Ok(CommandAck::Applied)
            }
            Command::Focus(id) => self.focus(&id),
            Command::Quit => {
                self.shutdown();
                Ok(CommandAck::Applied)
            }
        }
    }

    fn exercise(&self, id: &str) -> Result<&Exercise, CommandRejected> {
        self.collection
            .get(id)
            .ok_or_else(|| CommandRejected::UnknownExercise(id.to_string()))
    }

    fn on_changed(&mut self, id: &str) {
        if self.quitting {
            return;
        }
        if !self.collection.contains(id) {
            debug!(exercise = %id, "ignoring change for unknown exercise");
            return;
        }
        self.request_check(id);
    }

    /// Start a check of `id` now, or queue it behind the current work.
    ///
    /// A check of the same exercise is superseded rather than waited for.
    fn request_check(&mut self, id: &str) {
        let busy_elsewhere = self.inflight.keys().any(|checking| checking != id);
        if self.run_all.is_some() || busy_elsewhere {
            self.defer(id);
        } else {
            self.start_check(id);
        }
    }

    fn defer(&mut self, id: &str) {
        if !self.deferred.iter().any(|queued| queued == id) {
            debug!(exercise = %id, run_all = self.run_all.is_some(), "deferring check");
            self.deferred.push_back(id.to_string());
        }
    }

    /// Start the next queued check once nothing else is running.
    fn start_deferred(&mut self) {
        if self.quitting || self.run_all.is_some() || !self.inflight.is_empty() {
            return;
        }
        if let Some(next) = self.deferred.pop_front() {
            self.start_check(&next);
        }
    }

    /// Supersede any in-flight check of `id` and start a new one.
    fn start_check(&mut self, id: &str) {
        let Some(exercise) = self.collection.get(id).cloned() else {
            return;
        };
        if let Some(previous) = self.inflight.remove(id) {
            debug!(exercise = %id, generation = previous.generation, "superseding in-flight check");
            previous.cancel.cancel();
        }
        let generation = self.generations.issue(id);
        self.persist_status(id, ExerciseStatus::Running, None);
        self.emit(UiEvent::ExerciseStarted(id.to_string()));

        let cancel = CancelToken::new();
        self.inflight.insert(
            id.to_string(),
            InFlight {
                generation,
                cancel: cancel.clone(),
            },
        );
        let request = CheckRequest {
            exercise,
            generation,
            timeout: self.settings.check_timeout,
        };
        let checker = Arc::clone(&self.checker);
        let tx = self.tx.clone();
        debug!(exercise = %id, generation, "dispatching check");
        let spawned = thread::Builder::new()
            .name(format!("check-{id}"))
            .spawn(move || {
                let outcome = checker.check(&request, &cancel);
                if outcome.cancelled || cancel.is_cancelled() {
                    debug!(exercise = %request.exercise.id, generation, "dropping cancelled check");
                    return;
                }
                let _ = tx.send(EngineEvent::CheckFinished(outcome));
            });
        if let Err(err) = spawned {
            error!(exercise = %id, err = %err, "failed to spawn check worker");
            self.on_outcome(CheckOutcome {
                exercise_id: id.to_string(),
                generation,
                status: CheckStatus::Errored,
                output: format!("spawn check worker: {err}"),
                elapsed: Duration::ZERO,
                cancelled: false,
            });
        }
    }

    fn on_outcome(&mut self, outcome: CheckOutcome) {
        let id = outcome.exercise_id.clone();
        let Some(mode) = self.collection.get(&id).map(|ex| ex.mode) else {
            warn!(exercise = %id, "outcome for unknown exercise");
            return;
        };
        if outcome.cancelled {
            debug!(exercise = %id, generation = outcome.generation, "ignoring cancelled outcome");
            return;
        }
        if !self.generations.accept(&id, outcome.generation) {
            debug!(exercise = %id, generation = outcome.generation, "dropping stale outcome");
            return;
        }
        if self
            .inflight
            .get(&id)
            .is_some_and(|flight| flight.generation <= outcome.generation)
        {
            self.inflight.remove(&id);
        }

        let passed = outcome.status.passed();
        let status = if passed {
            ExerciseStatus::Done
        } else {
            ExerciseStatus::Failed
        };
        let diagnostic = diagnostic_for(&outcome, mode, self.settings.check_timeout);
        info!(
            exercise = %id,
            generation = outcome.generation,
            check = ?outcome.status,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "check committed"
        );
        self.commit(&id, status, Some(outcome.status), diagnostic);

        if passed && self.cursor.as_deref() == Some(id.as_str()) {
            self.advance_cursor(&id);
        }
        self.continue_run_all(&id, passed);
        self.start_deferred();
    }

    fn skip(&mut self, id: &str) -> CommandResult {
        self.exercise(id)?;
        if self.store.status(id) == ExerciseStatus::Skipped {
            return Ok(CommandAck::Unchanged);
        }
        self.cancel_inflight(id);
        self.commit(id, ExerciseStatus::Skipped, None, None);
        if self.cursor.as_deref() == Some(id) {
            self.advance_cursor(id);
        }
        Ok(CommandAck::Applied)
    }

    fn unskip(&mut self, id: &str) -> CommandResult {
        self.exercise(id)?;
        if self.store.status(id) != ExerciseStatus::Skipped {
            return Err(CommandRejected::NotSkipped(id.to_string()));
        }
        self.commit(id, ExerciseStatus::Pending, None, None);
        Ok(CommandAck::Applied)
    }

    fn reset(&mut self, id: &str) -> CommandResult {
        let exercise = self.exercise(id)?.clone();
        if self.store.status(id) == ExerciseStatus::Pending {
            return Ok(CommandAck::Unchanged);
        }
        let restored = self
            .restorer
            .restore(&exercise)
            .map_err(|err| CommandRejected::RestoreFailed {
                id: id.to_string(),
                reason: format!("{err:#}"),
            })?;
        debug!(exercise = %id, restored = ?restored, "exercise reset");
        self.cancel_inflight(id);
        self.commit(id, ExerciseStatus::Pending, None, None);
        Ok(CommandAck::Applied)
    }

    fn focus(&mut self, id: &str) -> CommandResult {
        self.exercise(id)?;
        if let Some(blocker) = blocking_predecessor(&self.collection, self.store.record(), id) {
            return Err(CommandRejected::Locked {
                id: id.to_string(),
                requires: blocker.id.clone(),
            });
        }
        if self.cursor.as_deref() == Some(id) {
            return Ok(CommandAck::Unchanged);
        }
        self.set_cursor(id.to_string());
        Ok(CommandAck::Applied)
    }

    fn start_run_all(&mut self) -> CommandResult {
        if self.run_all.is_some() {
            return Err(CommandRejected::RunAllInProgress);
        }
        let targets = run_all_targets(
            &self.collection,
            self.store.record(),
            self.settings.run_all_scope == RunAllScope::All,
        );
        let count = targets.len();
        info!(count, scope = ?self.settings.run_all_scope, "run all started");
        self.run_all = Some(RunAllBatch {
            queue: targets.into(),
            ..RunAllBatch::default()
        });
        self.advance_run_all();
        Ok(CommandAck::RunAllStarted(count))
    }

    fn continue_run_all(&mut self, id: &str, passed: bool) {
        let continue_on_failure = self.settings.continue_on_failure;
        let Some(batch) = self.run_all.as_mut() else {
            return;
        };
        if batch.current.as_deref() != Some(id) {
            return;
        }
        batch.current = None;
        batch.checked.push(id.to_string());
        if !passed {
            batch.failed.push(id.to_string());
            if !continue_on_failure {
                debug!(exercise = %id, remaining = batch.queue.len(), "run all stopping at failure");
                batch.queue.clear();
            }
        }
        self.advance_run_all();
    }

    fn advance_run_all(&mut self) {
        let Some(batch) = self.run_all.as_mut() else {
            return;
        };
        match batch.queue.pop_front() {
            Some(next) => {
                batch.current = Some(next.clone());
                self.start_check(&next);
            }
            None => self.finish_run_all(),
        }
    }

    fn finish_run_all(&mut self) {
        let Some(batch) = self.run_all.take() else {
            return;
        };
        info!(checked = batch.checked.len(), failed = batch.failed.len(), "run all finished");
        self.emit(UiEvent::RunAllFinished {
            checked: batch.checked,
            failed: batch.failed,
        });
        self.start_deferred();
    }

    /// Cancel any in-flight check of `id` and make its outcome stale.
    fn cancel_inflight(&mut self, id: &str) {
        if let Some(flight) = self.inflight.remove(id) {
            debug!(exercise = %id, generation = flight.generation, "cancelling in-flight check");
            flight.cancel.cancel();
        }
        self.deferred.retain(|queued| queued != id);
        self.generations.invalidate(id);
        if let Some(batch) = self.run_all.as_mut()
            && batch.current.as_deref() == Some(id)
        {
            batch.current = None;
            self.advance_run_all();
        }
        self.start_deferred();
    }

    /// Persist a settled transition and tell the UI about it.
    fn commit(
        &mut self,
        id: &str,
        status: ExerciseStatus,
        check: Option<CheckStatus>,
        diagnostic: Option<String>,
    ) {
        self.persist_status(id, status, diagnostic.clone());
        self.emit(UiEvent::ExerciseOutcome {
            id: id.to_string(),
            status,
            check,
            diagnostic,
        });
        if matches!(status, ExerciseStatus::Pending | ExerciseStatus::Failed) {
            self.reopen(id);
        }
    }

    /// The in-memory record moves on even when the write fails; the learner is told.
    fn persist_status(&mut self, id: &str, status: ExerciseStatus, diagnostic: Option<String>) {
        if let Err(err) = self.store.apply(id, status, diagnostic) {
            error!(exercise = %id, err = %err, "failed to persist progress");
            self.emit(UiEvent::ProgressNotSaved {
                reason: err.to_string(),
            });
        }
    }

    /// An exercise became open again after the session was complete.
    fn reopen(&mut self, id: &str) {
        if self.complete {
            info!(exercise = %id, "session reopened");
            self.complete = false;
        }
        if self.cursor.is_none() {
            self.set_cursor(id.to_string());
        }
    }

    fn advance_cursor(&mut self, from: &str) {
        let next = next_unsettled(&self.collection, self.store.record(), from).map(|ex| ex.id.clone());
        match next {
            Some(next) => self.set_cursor(next),
            None => {
                self.cursor = None;
                if !self.complete {
                    self.complete = true;
                    info!("all exercises settled");
                    self.emit(UiEvent::SessionComplete);
                }
            }
        }
    }

    fn set_cursor(&mut self, id: String) {
        debug!(exercise = %id, "cursor moved");
        if let Err(err) = self.store.set_last_focus(Some(&id)) {
            error!(exercise = %id, err = %err, "failed to persist focus");
            self.emit(UiEvent::ProgressNotSaved {
                reason: err.to_string(),
            });
        }
        self.cursor = Some(id.clone());
        self.emit(UiEvent::CursorAdvanced(id));
    }

    fn shutdown(&mut self) {
        self.quitting = true;
        for (id, flight) in self.inflight.drain() {
            debug!(exercise = %id, generation = flight.generation, "cancelling check on shutdown");
            flight.cancel.cancel();
        }
        if let Err(err) = self.store.persist() {
            error!(err = %err, "failed to persist progress on shutdown");
            self.emit(UiEvent::ProgressNotSaved {
                reason: err.to_string(),
            });
        }
        info!("engine stopped");
    }

    fn emit(&self, event: UiEvent) {
        // The UI may have gone away; the engine keeps its state regardless.
        let _ = self.ui.send(event);
    }
}

impl<C> Drop for Engine<C> {
    fn drop(&mut self) {
        for flight in self.inflight.values() {
            flight.cancel.cancel();
        }
    }
}
