//! Turning raw check output into learner-facing diagnostics.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::core::types::{CheckOutcome, CheckStatus};
use crate::exercise::ExerciseMode;

/// `FAILED tests/test_x.py::test_name - AssertionError: message`
static SUMMARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:FAILED|ERROR) (?P<target>\S+)(?: - (?P<reason>.+))?$")
        .expect("summary regex")
});

/// `E       AssertionError: expected 5`
static ASSERTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^E\s+AssertionError:\s*(?P<detail>.+)$")
        .expect("assertion regex")
});

/// `  File "exercises/01_variables/variables1.py", line 7, in <module>`
static LOCATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"File "(?:[^"]*/)?(?P<file>exercises/[^"]+)", line (?P<line>\d+)"#)
        .expect("location regex")
});

/// Extract a short failure summary from pytest-style test output.
///
/// Returns `None` when the output has no recognisable failure lines.
pub fn summarize_test_failures(output: &str) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in output.lines() {
        let line = raw.trim_end();
        if let Some(caps) = SUMMARY_LINE.captures(line) {
            let target = &caps["target"];
            let test_name = target.rsplit("::").next().unwrap_or(target);
            match caps.name("reason") {
                Some(reason) => lines.push(format!("{test_name}: {}", reason.as_str().trim())),
                None => lines.push(test_name.to_string()),
            }
        } else if let Some(caps) = ASSERTION_LINE.captures(line) {
            let detail = caps["detail"].trim();
            if !lines.iter().any(|existing| existing.contains(detail)) {
                lines.push(format!("  {detail}"));
            }
        } else if let Some(caps) = LOCATION_LINE.captures(line) {
            let location = format!("  at {}:{}", &caps["file"], &caps["line"]);
            if !lines.contains(&location) {
                lines.push(location);
            }
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Diagnostic text recorded for a non-passing outcome.
///
/// `None` for passed checks.
pub fn diagnostic_for(outcome: &CheckOutcome, mode: ExerciseMode, timeout: Duration) -> Option<String> {
    let output = outcome.output.trim_end();
    match outcome.status {
        CheckStatus::Passed => None,
        CheckStatus::TimedOut => Some(join_sections(
            &format!("check timed out after {}s", timeout.as_secs_f32()),
            output,
        )),
        CheckStatus::Errored => Some(join_sections("could not run the check", output)),
        CheckStatus::Failed => {
            let summary = match mode {
                ExerciseMode::Test => summarize_test_failures(output),
                ExerciseMode::Run => None,
            };
            Some(match summary {
                Some(summary) => join_sections(&summary, output),
                None if output.is_empty() => "check failed without output".to_string(),
                None => output.to_string(),
            })
        }
    }
}

fn join_sections(head: &str, body: &str) -> String {
    if body.is_empty() {
        head.to_string()
    } else {
        format!("{head}\n\n{body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTEST_OUTPUT: &str = "\
tests/01_variables/test_variables1.py::test_output FAILED
=================================== FAILURES ===================================
E       AssertionError: expected x to be 5
  File \"/home/me/work/exercises/01_variables/variables1.py\", line 7, in <module>
=========================== short test summary info ============================
FAILED tests/01_variables/test_variables1.py::test_output - AssertionError: expected x to be 5
ERROR tests/01_variables/test_variables1.py
";

    fn outcome(status: CheckStatus, output: &str) -> CheckOutcome {
        CheckOutcome {
            exercise_id: "variables1".to_string(),
            generation: 1,
            status,
            output: output.to_string(),
            elapsed: Duration::from_millis(10),
            cancelled: false,
        }
    }

    #[test]
    fn summarizes_failed_and_errored_tests() {
        let summary = summarize_test_failures(PYTEST_OUTPUT).expect("summary");
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(
            lines,
            vec![
                "  expected x to be 5",
                "  at exercises/01_variables/variables1.py:7",
                "test_output: AssertionError: expected x to be 5",
                "tests/01_variables/test_variables1.py",
            ]
        );
    }

    #[test]
    fn plain_output_has_no_summary() {
        assert_eq!(summarize_test_failures("Traceback\nNameError: x\n"), None);
    }

    #[test]
    fn run_mode_failure_keeps_raw_output() {
        let diagnostic = diagnostic_for(
            &outcome(CheckStatus::Failed, "NameError: x\n"),
            ExerciseMode::Run,
            Duration::from_secs(10),
        );
        assert_eq!(diagnostic.as_deref(), Some("NameError: x"));
    }

    #[test]
    fn test_mode_failure_prefixes_summary() {
        let diagnostic = diagnostic_for(
            &outcome(CheckStatus::Failed, PYTEST_OUTPUT),
            ExerciseMode::Test,
            Duration::from_secs(10),
        )
        .expect("diagnostic");
        assert!(diagnostic.starts_with("  expected x to be 5"));
        assert!(diagnostic.contains("short test summary info"));
    }

    #[test]
    fn timeout_and_error_are_labelled() {
        let timed_out = diagnostic_for(
            &outcome(CheckStatus::TimedOut, ""),
            ExerciseMode::Run,
            Duration::from_secs(2),
        );
        assert_eq!(timed_out.as_deref(), Some("check timed out after 2s"));

        let errored = diagnostic_for(
            &outcome(CheckStatus::Errored, "failed to launch `python3`: not found"),
            ExerciseMode::Run,
            Duration::from_secs(2),
        )
        .expect("diagnostic");
        assert!(errored.starts_with("could not run the check"));
    }

    #[test]
    fn passed_has_no_diagnostic() {
        assert_eq!(
            diagnostic_for(
                &outcome(CheckStatus::Passed, "ok"),
                ExerciseMode::Run,
                Duration::from_secs(1)
            ),
            None
        );
    }
}
