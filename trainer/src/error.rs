//! Typed errors at component boundaries.
//!
//! Orchestration code wraps these in `anyhow` with context; the engine and the
//! session bootstrap match on them to decide what is fatal.

use std::path::PathBuf;

use thiserror::Error;

/// Catalog problems. Always fatal: the session cannot start without a catalog.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("read catalog {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse catalog {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("{origin}: catalog has no exercises")]
    Empty { origin: String },
    #[error("{origin}:{line}: exercise #{index} field `{field}` {reason}")]
    InvalidField {
        origin: String,
        line: usize,
        index: usize,
        field: &'static str,
        reason: String,
    },
    #[error("{origin}:{line}: duplicate id '{id}' (first defined on line {first_line})")]
    DuplicateId {
        origin: String,
        id: String,
        line: usize,
        first_line: usize,
    },
    #[error("{origin}:{line}: path '{}' of '{id}' is already used by '{first_id}' (line {first_line})", path.display())]
    DuplicatePath {
        origin: String,
        path: PathBuf,
        id: String,
        line: usize,
        first_id: String,
        first_line: usize,
    },
    #[error("{origin}: field `order` {reason}")]
    Ordering { origin: String, reason: String },
    #[error("exercise '{id}' field `path` points to missing file {}", path.display())]
    MissingFile { id: String, path: PathBuf },
    #[error("exercise '{id}' field `test` points to missing file {}", path.display())]
    MissingTest { id: String, path: PathBuf },
}

/// Progress store problems. Fatal at startup, recoverable by starting fresh.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("progress store {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("progress store {} has unsupported version {version}", path.display())]
    UnsupportedVersion { path: PathBuf, version: u32 },
    #[error("{action} progress store {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize progress record: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl StoreError {
    /// True when the persisted data exists but cannot be understood.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            StoreError::Corrupt { .. } | StoreError::UnsupportedVersion { .. }
        )
    }
}

/// The check could not be executed at all (environment problem, not learner code).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CheckExecutionError {
    #[error("no command configured for {mode} mode")]
    NoCommand { mode: &'static str },
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{action}: {source}")]
    Io {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("output reader thread panicked")]
    ReaderPanicked,
}

/// Filesystem watching could not be established.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WatcherError {
    #[error("create filesystem watcher: {0}")]
    Create(#[source] notify::Error),
    #[error("watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("spawn debounce thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// Synchronous rejection of a UI/CLI command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandRejected {
    #[error("unknown exercise '{0}'")]
    UnknownExercise(String),
    #[error("exercise '{0}' is not skipped")]
    NotSkipped(String),
    #[error("exercise '{id}' is locked until '{requires}' is done")]
    Locked { id: String, requires: String },
    #[error("run all is already in progress")]
    RunAllInProgress,
    #[error("restore exercise '{id}': {reason}")]
    RestoreFailed { id: String, reason: String },
    #[error("engine is shutting down")]
    ShuttingDown,
}

/// Fatal startup errors, kept distinct from ordinary exercise failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StartupError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("{0} (rerun with --fresh to start over)")]
    Store(#[source] StoreError),
    #[error("load config: {0:#}")]
    Config(anyhow::Error),
}
