//! Messages into and out of the engine.

use std::sync::mpsc::{self, SyncSender};

use crate::core::types::{CheckOutcome, CheckStatus, ExerciseStatus};
use crate::error::CommandRejected;

/// Everything the engine loop consumes, from one bounded queue.
#[derive(Debug)]
pub enum EngineEvent {
    /// A debounced edit to an exercise file.
    Changed(String),
    Command {
        command: Command,
        reply: Option<mpsc::Sender<CommandResult>>,
    },
    /// Posted by a check worker.
    CheckFinished(CheckOutcome),
}

/// Requests from the UI or CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hint(String),
    Skip(String),
    Unskip(String),
    ResetExercise(String),
    RunAll,
    Quit,
    /// Check an exercise now, without waiting for an edit.
    Check(String),
    /// Move the cursor to an exercise.
    Focus(String),
}

/// Successful command reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAck {
    /// The command changed state or started work.
    Applied,
    /// The command was valid but there was nothing to do.
    Unchanged,
    Hint(Option<String>),
    /// A run-all batch started with this many exercises.
    RunAllStarted(usize),
}

pub type CommandResult = Result<CommandAck, CommandRejected>;

/// Engine to UI notifications, in causal order per exercise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    ExerciseStarted(String),
    ExerciseOutcome {
        id: String,
        status: ExerciseStatus,
        /// Set when the transition came from a check rather than a command.
        check: Option<CheckStatus>,
        diagnostic: Option<String>,
    },
    CursorAdvanced(String),
    SessionComplete,
    RunAllFinished {
        checked: Vec<String>,
        /// Exercises in the batch whose check did not pass.
        failed: Vec<String>,
    },
    /// A progress write failed; the session goes on but is not durable.
    ProgressNotSaved { reason: String },
}

/// Cloneable submission side of the engine queue.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: SyncSender<EngineEvent>,
}

impl EngineHandle {
    pub(crate) fn new(tx: SyncSender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Submit a command and wait for the engine's reply.
    pub fn send(&self, command: Command) -> CommandResult {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(EngineEvent::Command {
                command,
                reply: Some(reply_tx),
            })
            .map_err(|_| CommandRejected::ShuttingDown)?;
        reply_rx.recv().map_err(|_| CommandRejected::ShuttingDown)?
    }

    /// Report an edit. Returns false once the engine has stopped.
    pub fn changed(&self, id: impl Into<String>) -> bool {
        self.tx.send(EngineEvent::Changed(id.into())).is_ok()
    }
}
