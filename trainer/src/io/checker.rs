//! Checker abstraction for exercise execution.
//!
//! The [`Checker`] trait decouples the engine from how an exercise is actually
//! run (currently a configured toolchain subprocess). Tests use scripted
//! checkers that return predetermined outcomes without spawning processes.
//!
//! When an exercise has a paired test file under `tests/`, a `run` exercise
//! must both run cleanly and pass its tests, and a `test` exercise runs the
//! paired file instead of the exercise itself.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::types::{CheckOutcome, CheckStatus};
use crate::error::CheckExecutionError;
use crate::exercise::{Exercise, ExerciseMode};
use crate::io::config::{ToolchainConfig, TrainerConfig};
use crate::io::init::TrainerPaths;
use crate::io::process::{ProcessEnd, run_command_cancellable};

/// Parameters for one check.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub exercise: Exercise,
    /// Generation stamped by the engine; echoed back on the outcome.
    pub generation: u64,
    pub timeout: Duration,
}

/// Abstraction over exercise execution backends.
///
/// Implementations run on worker threads and must return promptly once
/// `cancel` fires, with `CheckOutcome::cancelled` set.
pub trait Checker: Send + Sync {
    fn check(&self, request: &CheckRequest, cancel: &CancelToken) -> CheckOutcome;
}

/// Runs the configured toolchain command with the exercise path appended.
#[derive(Debug, Clone)]
pub struct ProcessChecker {
    exercises_dir: PathBuf,
    tests_dir: PathBuf,
    workdir: PathBuf,
    toolchain: ToolchainConfig,
    output_limit_bytes: usize,
}

impl ProcessChecker {
    pub fn new(paths: &TrainerPaths, config: &TrainerConfig) -> Self {
        let workdir = match &config.toolchain.workdir {
            Some(dir) => paths.root.join(dir),
            None => paths.root.clone(),
        };
        Self {
            exercises_dir: paths.exercises_dir.clone(),
            tests_dir: paths.tests_dir.clone(),
            workdir,
            toolchain: config.toolchain.clone(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    /// Commands to run in order; the check passes only if all of them do.
    fn steps(&self, exercise: &Exercise) -> Vec<(ExerciseMode, PathBuf)> {
        let file = self.exercises_dir.join(&exercise.path);
        let paired = exercise
            .paired_test()
            .map(|test| self.tests_dir.join(test))
            .filter(|test| test.is_file());
        match (exercise.mode, paired) {
            (ExerciseMode::Run, Some(test)) => {
                vec![(ExerciseMode::Run, file), (ExerciseMode::Test, test)]
            }
            (ExerciseMode::Run, None) => vec![(ExerciseMode::Run, file)],
            (ExerciseMode::Test, target) => vec![(ExerciseMode::Test, target.unwrap_or(file))],
        }
    }

    fn command_for(&self, mode: ExerciseMode, target: &Path) -> Result<Command, CheckExecutionError> {
        let argv = match mode {
            ExerciseMode::Run => &self.toolchain.run,
            ExerciseMode::Test => &self.toolchain.test,
        };
        let (program, args) = argv.split_first().ok_or(CheckExecutionError::NoCommand {
            mode: mode.as_str(),
        })?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(target)
            .current_dir(&self.workdir)
            .envs(&self.toolchain.env);
        Ok(cmd)
    }

    /// One step, classified as `(status, output, cancelled)`.
    fn run_step(
        &self,
        mode: ExerciseMode,
        target: &Path,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> (CheckStatus, String, bool) {
        let result = self.command_for(mode, target).and_then(|cmd| {
            run_command_cancellable(cmd, timeout, self.output_limit_bytes, cancel)
        });
        match result {
            Err(err) => {
                warn!(err = %err, "check could not run");
                (CheckStatus::Errored, err.to_string(), false)
            }
            Ok(out) => {
                let text = out.combined_text();
                match out.end {
                    ProcessEnd::Exited(status) if status.success() => {
                        (CheckStatus::Passed, text, false)
                    }
                    ProcessEnd::Exited(status) => {
                        debug!(exit_code = ?status.code(), step = %mode, "check failed");
                        (CheckStatus::Failed, text, false)
                    }
                    ProcessEnd::TimedOut => (CheckStatus::TimedOut, text, false),
                    ProcessEnd::Cancelled => (CheckStatus::Failed, text, true),
                }
            }
        }
    }
}

impl Checker for ProcessChecker {
    #[instrument(skip_all, fields(exercise = %request.exercise.id, generation = request.generation, mode = %request.exercise.mode))]
    fn check(&self, request: &CheckRequest, cancel: &CancelToken) -> CheckOutcome {
        let started = Instant::now();
        let deadline = started + request.timeout;
        let mut status = CheckStatus::Errored;
        let mut output = String::new();
        let mut cancelled = false;
        // All steps share one timeout budget.
        for (mode, target) in self.steps(&request.exercise) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (step_status, text, step_cancelled) = self.run_step(mode, &target, remaining, cancel);
            output.push_str(&text);
            status = step_status;
            cancelled = step_cancelled;
            if cancelled || !status.passed() {
                break;
            }
        }

        let elapsed = started.elapsed();
        info!(status = ?status, cancelled, elapsed_ms = elapsed.as_millis() as u64, "check finished");
        CheckOutcome {
            exercise_id: request.exercise.id.clone(),
            generation: request.generation,
            status,
            output,
            elapsed,
            cancelled,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    use crate::core::catalog::parse_catalog;

    fn checker_for(temp: &tempfile::TempDir, run: &[&str]) -> ProcessChecker {
        let paths = TrainerPaths::new(temp.path());
        fs::create_dir_all(&paths.exercises_dir).expect("mkdir");
        let mut config = TrainerConfig::default();
        config.toolchain.run = run.iter().map(|s| s.to_string()).collect();
        config.toolchain.test = vec!["sh".to_string()];
        ProcessChecker::new(&paths, &config)
    }

    fn request(temp: &tempfile::TempDir, script: &str, mode: &str) -> CheckRequest {
        request_at(temp, "ex.sh", script, mode)
    }

    fn request_at(temp: &tempfile::TempDir, path: &str, script: &str, mode: &str) -> CheckRequest {
        let file = temp.path().join("exercises").join(path);
        fs::create_dir_all(file.parent().expect("parent")).expect("mkdir");
        fs::write(&file, script).expect("write");
        let collection = parse_catalog(
            &format!("[[exercises]]\nid = \"ex\"\npath = \"{path}\"\nmode = \"{mode}\"\n"),
            "info.toml",
        )
        .expect("catalog");
        CheckRequest {
            exercise: collection.get("ex").expect("exercise").clone(),
            generation: 7,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn clean_exit_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checker = checker_for(&temp, &["sh"]);
        let outcome = checker.check(&request(&temp, "echo ok\n", "run"), &CancelToken::new());
        assert_eq!(outcome.status, CheckStatus::Passed);
        assert_eq!(outcome.generation, 7);
        assert_eq!(outcome.output, "ok\n");
        assert!(!outcome.cancelled);
    }

    #[test]
    fn non_zero_exit_fails_with_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checker = checker_for(&temp, &["sh"]);
        let outcome = checker.check(
            &request(&temp, "echo 'assert failed' >&2\nexit 1\n", "test"),
            &CancelToken::new(),
        );
        assert_eq!(outcome.status, CheckStatus::Failed);
        assert_eq!(outcome.output, "assert failed\n");
    }

    #[test]
    fn timeout_is_reported_separately() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checker = checker_for(&temp, &["sh"]);
        let mut req = request(&temp, "exec sleep 5\n", "run");
        req.timeout = Duration::from_millis(150);
        let outcome = checker.check(&req, &CancelToken::new());
        assert_eq!(outcome.status, CheckStatus::TimedOut);
    }

    #[test]
    fn missing_interpreter_is_errored_not_failed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checker = checker_for(&temp, &["no-such-interpreter-here"]);
        let outcome = checker.check(&request(&temp, "", "run"), &CancelToken::new());
        assert_eq!(outcome.status, CheckStatus::Errored);
        assert!(outcome.output.contains("no-such-interpreter-here"));
    }

    #[test]
    fn cancelled_check_is_marked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checker = checker_for(&temp, &["sh"]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = checker.check(&request(&temp, "exec sleep 5\n", "run"), &cancel);
        assert!(outcome.cancelled);
    }

    fn write_test(temp: &tempfile::TempDir, relative: &str, script: &str) {
        let file = temp.path().join("tests").join(relative);
        fs::create_dir_all(file.parent().expect("parent")).expect("mkdir");
        fs::write(file, script).expect("write test");
    }

    #[test]
    fn paired_test_runs_after_a_clean_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checker = checker_for(&temp, &["sh"]);
        write_test(&temp, "basics/test_ex.sh", "echo tested\nexit 1\n");
        let req = request_at(&temp, "basics/ex.sh", "echo ran\n", "run");

        let outcome = checker.check(&req, &CancelToken::new());
        assert_eq!(outcome.status, CheckStatus::Failed);
        assert_eq!(outcome.output, "ran\ntested\n");
    }

    #[test]
    fn failed_run_skips_the_paired_test() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checker = checker_for(&temp, &["sh"]);
        write_test(&temp, "basics/test_ex.sh", "echo tested\n");
        let req = request_at(&temp, "basics/ex.sh", "echo broken\nexit 2\n", "run");

        let outcome = checker.check(&req, &CancelToken::new());
        assert_eq!(outcome.status, CheckStatus::Failed);
        assert_eq!(outcome.output, "broken\n");
    }

    #[test]
    fn run_and_paired_test_both_passing_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checker = checker_for(&temp, &["sh"]);
        write_test(&temp, "basics/test_ex.sh", "echo tested\n");
        let req = request_at(&temp, "basics/ex.sh", "echo ran\n", "run");

        let outcome = checker.check(&req, &CancelToken::new());
        assert_eq!(outcome.status, CheckStatus::Passed);
        assert_eq!(outcome.output, "ran\ntested\n");
    }

    /// In test mode the paired file is the target; the exercise is not run directly.
    #[test]
    fn test_mode_targets_the_paired_test() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checker = checker_for(&temp, &["sh"]);
        write_test(&temp, "basics/test_ex.sh", "echo from test\n");
        let req = request_at(&temp, "basics/ex.sh", "exit 1\n", "test");

        let outcome = checker.check(&req, &CancelToken::new());
        assert_eq!(outcome.status, CheckStatus::Passed);
        assert_eq!(outcome.output, "from test\n");
    }

    #[test]
    fn paired_test_shares_the_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checker = checker_for(&temp, &["sh"]);
        write_test(&temp, "basics/test_ex.sh", "exec sleep 5\n");
        let mut req = request_at(&temp, "basics/ex.sh", "exec sleep 0.2\n", "run");
        req.timeout = Duration::from_millis(400);

        let started = Instant::now();
        let outcome = checker.check(&req, &CancelToken::new());
        assert_eq!(outcome.status, CheckStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
