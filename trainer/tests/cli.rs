//! CLI tests for the `trainer` binary.
//!
//! Spawns the binary against scratch workspaces and verifies exit codes and
//! on-disk effects.

use std::fs;
use std::process::{Command, Output};

use trainer::core::types::ExerciseStatus;
use trainer::exit_codes;
use trainer::io::config::TrainerConfig;
use trainer::io::progress_store::ProgressStore;
use trainer::test_support::TestWorkspace;

fn trainer(ws: &TestWorkspace, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_trainer"))
        .arg("--root")
        .arg(ws.root())
        .args(args)
        .output()
        .expect("run trainer")
}

#[test]
fn list_marks_cursor_and_exits_ok() {
    let ws = TestWorkspace::new(&["ex01", "ex02"]);
    let out = trainer(&ws, &["list"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("> ex01"), "{stdout}");
    assert!(stdout.contains("0/2 done"), "{stdout}");
}

#[test]
fn list_complete_exits_with_complete_code() {
    let ws = TestWorkspace::new(&["ex01", "ex02"]);
    let mut store = ProgressStore::new(&ws.paths().progress_path);
    store.apply("ex01", ExerciseStatus::Done, None).expect("seed");
    store.apply("ex02", ExerciseStatus::Skipped, None).expect("seed");

    let out = trainer(&ws, &["list"]);
    assert_eq!(out.status.code(), Some(exit_codes::COMPLETE));
}

#[test]
fn corrupt_progress_is_reported_with_recovery_hint() {
    let ws = TestWorkspace::new(&["ex01"]);
    fs::create_dir_all(&ws.paths().state_dir).expect("mkdir");
    fs::write(&ws.paths().progress_path, "{ broken").expect("write");

    let out = trainer(&ws, &["list"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("corrupt"), "{stderr}");
    assert!(stderr.contains("--fresh"), "{stderr}");
}

#[test]
fn invalid_catalog_exits_invalid() {
    let ws = TestWorkspace::new(&["ex01"]);
    fs::write(
        &ws.paths().catalog_path,
        "[[exercises]]\nid = \"ex01\"\npath = \"ex01.py\"\n\n[[exercises]]\nid = \"ex01\"\npath = \"ex01.py\"\n",
    )
    .expect("write");

    let out = trainer(&ws, &["list"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("duplicate id 'ex01'"));
}

#[cfg(unix)]
#[test]
fn run_records_pass_and_failure() {
    let ws = TestWorkspace::new(&["ex01", "ex02"]);
    let mut config = TrainerConfig::default();
    config.toolchain.run = vec!["sh".to_string()];
    ws.write_config(&config);
    ws.write_exercise("ex02.py", "echo 'still broken' >&2\nexit 1\n");

    let passed = trainer(&ws, &["run", "ex01"]);
    assert_eq!(passed.status.code(), Some(exit_codes::OK));

    let failed = trainer(&ws, &["run", "ex02"]);
    assert_eq!(failed.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&failed.stdout).contains("still broken"));

    let store = ProgressStore::open(&ws.paths().progress_path).expect("open");
    assert_eq!(store.status("ex01"), ExerciseStatus::Done);
    assert_eq!(store.status("ex02"), ExerciseStatus::Failed);
    assert!(
        store
            .entry("ex02")
            .and_then(|entry| entry.diagnostic.as_deref())
            .is_some_and(|text| text.contains("still broken"))
    );
}

#[test]
fn init_then_reset_restores_original_file() {
    let ws = TestWorkspace::new(&["ex01"]);
    let init = trainer(&ws, &["init"]);
    assert_eq!(init.status.code(), Some(exit_codes::OK));

    ws.write_exercise("ex01.py", "x = 'my attempt'\n");
    let mut store = ProgressStore::new(&ws.paths().progress_path);
    store.apply("ex01", ExerciseStatus::Failed, None).expect("seed");

    let reset = trainer(&ws, &["reset", "ex01"]);
    assert_eq!(reset.status.code(), Some(exit_codes::OK));
    let contents = fs::read_to_string(ws.root().join("exercises/ex01.py")).expect("read");
    assert_eq!(contents, "# ex01\n");
    let store = ProgressStore::open(&ws.paths().progress_path).expect("open");
    assert_eq!(store.status("ex01"), ExerciseStatus::Pending);
}

#[test]
fn unknown_exercise_is_an_error() {
    let ws = TestWorkspace::new(&["ex01"]);
    let out = trainer(&ws, &["run", "nope"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown exercise 'nope'"));
}

#[test]
fn solution_prints_the_reference_file() {
    let ws = TestWorkspace::new(&["ex01", "ex02"]);
    fs::create_dir_all(&ws.paths().solutions_dir).expect("mkdir");
    fs::write(ws.paths().solutions_dir.join("ex01.py"), "answer = 42\n").expect("write");

    let found = trainer(&ws, &["solution", "ex01"]);
    assert_eq!(found.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&found.stdout).contains("answer = 42"));

    let missing = trainer(&ws, &["solution", "ex02"]);
    assert_eq!(missing.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&missing.stderr).contains("no solution for 'ex02'"));
}

#[test]
fn catalog_sharing_a_file_exits_invalid() {
    let ws = TestWorkspace::new(&["ex01"]);
    fs::write(
        &ws.paths().catalog_path,
        "[[exercises]]\nid = \"ex01\"\npath = \"ex01.py\"\n\n[[exercises]]\nid = \"ex02\"\npath = \"ex01.py\"\n",
    )
    .expect("write");

    let out = trainer(&ws, &["list"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("info.toml:7"), "{stderr}");
    assert!(stderr.contains("already used by 'ex01'"), "{stderr}");
}
