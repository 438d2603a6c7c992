//! Shared deterministic types for trainer core logic.
//!
//! These types define stable contracts between the engine, the progress store
//! and the checker. They must not depend on external state or I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-exercise progress status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseStatus {
    /// Not yet attempted, or reset.
    #[default]
    Pending,
    /// A check is in flight.
    Running,
    /// The last check succeeded.
    Done,
    /// The last check failed; the entry carries a diagnostic.
    Failed,
    /// The learner explicitly bypassed the exercise.
    Skipped,
}

impl ExerciseStatus {
    /// True when the cursor should not stop on an exercise with this status.
    pub fn is_settled(self) -> bool {
        matches!(self, ExerciseStatus::Done | ExerciseStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExerciseStatus::Pending => "pending",
            ExerciseStatus::Running => "running",
            ExerciseStatus::Done => "done",
            ExerciseStatus::Failed => "failed",
            ExerciseStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ExerciseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal classification of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Clean exit within the timeout.
    Passed,
    /// Non-zero exit or failed assertion: the learner's code is wrong.
    Failed,
    /// Killed after exceeding the timeout.
    TimedOut,
    /// Could not be executed (missing toolchain, permissions).
    Errored,
}

impl CheckStatus {
    pub fn passed(self) -> bool {
        self == CheckStatus::Passed
    }
}

/// Result of one checker invocation. Folded into the progress record, then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub exercise_id: String,
    /// Generation the check was issued under.
    pub generation: u64,
    pub status: CheckStatus,
    /// Combined stdout/stderr (or the launch error for `Errored`).
    pub output: String,
    pub elapsed: Duration,
    /// Set when the caller cancelled the check; such outcomes are never committed.
    pub cancelled: bool,
}

/// One exercise's persisted progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub status: ExerciseStatus,
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub diagnostic: Option<String>,
}

impl ProgressEntry {
    pub fn pending() -> Self {
        Self::default()
    }
}

/// Exercise id to progress entry. Key order is stable for serialization.
pub type ProgressRecord = BTreeMap<String, ProgressEntry>;
