//! Watch-mode exercise trainer.
//!
//! Watches an ordered catalog of exercises (`exercises/info.toml`), checks each
//! one when it is saved and tracks progress in `.trainer/progress.json`.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::warn;

use trainer::cancel::CancelToken;
use trainer::core::diagnostic::diagnostic_for;
use trainer::core::types::{CheckStatus, ExerciseStatus};
use trainer::engine::{Command, CommandAck, Engine, UiEvent};
use trainer::exit_codes;
use trainer::io::backup::{BackupRestorer, Restore, RestoreResult};
use trainer::io::checker::{CheckRequest, Checker, ProcessChecker};
use trainer::io::init::{InitOptions, TrainerPaths, init_workspace};
use trainer::io::solution::read_solution;
use trainer::io::watcher::spawn_supervised_watcher;
use trainer::logging;
use trainer::start::{SessionOptions, open_session};

#[derive(Parser)]
#[command(name = "trainer", version, about = "Watch-mode exercise trainer")]
struct Cli {
    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Create `.trainer/` with a default config and exercise backups.
    Init {
        /// Overwrite existing config and backups.
        #[arg(short, long)]
        force: bool,
    },
    /// Watch exercises and check each one as it is saved.
    Watch {
        /// Resume at the exercise focused last time.
        #[arg(long)]
        restore: bool,
        /// Discard saved progress and start over.
        #[arg(long)]
        fresh: bool,
    },
    /// Print progress in catalog order.
    List,
    /// Check one exercise once and print its output.
    Run { id: String },
    /// Restore an exercise from its backup and mark it pending.
    Reset { id: String },
    /// Print the reference solution for an exercise.
    Solution { id: String },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let paths = TrainerPaths::new(root);
    match cli.command {
        CliCommand::Init { force } => cmd_init(&paths, force),
        CliCommand::Watch { restore, fresh } => cmd_watch(&paths, restore, fresh),
        CliCommand::List => cmd_list(&paths),
        CliCommand::Run { id } => cmd_run(&paths, &id),
        CliCommand::Reset { id } => cmd_reset(&paths, &id),
        CliCommand::Solution { id } => cmd_solution(&paths, &id),
    }
}

fn cmd_init(paths: &TrainerPaths, force: bool) -> Result<i32> {
    let paths = init_workspace(&paths.root, &InitOptions { force })?;
    println!("initialized {}", paths.state_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_list(paths: &TrainerPaths) -> Result<i32> {
    let session = open_session(paths, &SessionOptions::default())?;
    let width = session.collection.ids().map(str::len).max().unwrap_or(0);
    for exercise in &session.collection {
        let marker = if session.cursor.as_deref() == Some(exercise.id.as_str()) {
            ">"
        } else {
            " "
        };
        let status = session.store.status(&exercise.id);
        println!(
            "{marker} {:<width$}  {:<7}  {}",
            exercise.id,
            status.as_str(),
            exercise.name
        );
    }
    let done = session
        .collection
        .iter()
        .filter(|ex| session.store.status(&ex.id).is_settled())
        .count();
    println!("{done}/{} done", session.collection.len());
    Ok(if session.is_complete() {
        exit_codes::COMPLETE
    } else {
        exit_codes::OK
    })
}

fn cmd_run(paths: &TrainerPaths, id: &str) -> Result<i32> {
    let mut session = open_session(paths, &SessionOptions::default())?;
    let exercise = session
        .collection
        .get(id)
        .cloned()
        .ok_or_else(|| anyhow!("unknown exercise '{id}'"))?;
    let checker = ProcessChecker::new(paths, &session.config);
    let request = CheckRequest {
        exercise: exercise.clone(),
        generation: 1,
        timeout: session.config.check_timeout(),
    };
    let outcome = checker.check(&request, &CancelToken::new());
    print!("{}", outcome.output);

    let diagnostic = diagnostic_for(&outcome, exercise.mode, request.timeout);
    let status = if outcome.status.passed() {
        ExerciseStatus::Done
    } else {
        ExerciseStatus::Failed
    };
    session
        .store
        .apply(id, status, diagnostic)
        .context("record check result")?;
    println!("{}", outcome_line(id, status, Some(outcome.status)));
    Ok(if outcome.status.passed() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_reset(paths: &TrainerPaths, id: &str) -> Result<i32> {
    let mut session = open_session(paths, &SessionOptions::default())?;
    let exercise = session
        .collection
        .get(id)
        .ok_or_else(|| anyhow!("unknown exercise '{id}'"))?;
    let restored = BackupRestorer::new(paths.clone()).restore(exercise)?;
    session
        .store
        .apply(id, ExerciseStatus::Pending, None)
        .context("record reset")?;
    match restored {
        RestoreResult::Restored => println!("{id}: restored from backup"),
        RestoreResult::NoBackup => println!("{id}: no backup found, progress reset only"),
    }
    Ok(exit_codes::OK)
}

fn cmd_solution(paths: &TrainerPaths, id: &str) -> Result<i32> {
    let session = open_session(paths, &SessionOptions::default())?;
    let exercise = session
        .collection
        .get(id)
        .ok_or_else(|| anyhow!("unknown exercise '{id}'"))?;
    let solution = read_solution(paths, exercise)?.ok_or_else(|| {
        anyhow!(
            "no solution for '{id}' (looked for {})",
            paths.solutions_dir.join(&exercise.path).display()
        )
    })?;
    println!("# {}", solution.path.display());
    print!("{}", solution.contents);
    Ok(exit_codes::OK)
}

fn cmd_watch(paths: &TrainerPaths, restore: bool, fresh: bool) -> Result<i32> {
    let session = open_session(
        paths,
        &SessionOptions {
            restore_focus: restore,
            fresh,
        },
    )?;
    let config = session.config.clone();
    let collection = session.collection.clone();
    let focus = Arc::new(Mutex::new(session.cursor.clone()));
    let names: HashMap<String, String> = collection
        .iter()
        .map(|ex| (ex.id.clone(), ex.name.clone()))
        .collect();

    let checker = Arc::new(ProcessChecker::new(paths, &config));
    let (ui_tx, ui_rx) = mpsc::channel();
    let engine = Engine::new(
        session,
        checker,
        Box::new(BackupRestorer::new(paths.clone())),
        ui_tx,
    );
    let handle = engine.handle();
    let engine_thread = thread::Builder::new()
        .name("trainer-engine".to_string())
        .spawn(move || engine.run())
        .context("spawn engine thread")?;
    let render_focus = Arc::clone(&focus);
    let render_thread = thread::Builder::new()
        .name("trainer-render".to_string())
        .spawn(move || render_events(ui_rx, &render_focus, &names))
        .context("spawn render thread")?;

    let watch_handle = handle.clone();
    let watcher = match spawn_supervised_watcher(
        &paths.exercises_dir,
        &collection,
        config.debounce(),
        config.watch_retries,
        move |id| watch_handle.changed(id),
        |err| println!("watching stopped ({err}); use `c` to check manually"),
    ) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!(err = %err, "watching unavailable");
            println!("watching unavailable ({err}); use `c` to check manually");
            None
        }
    };

    match current_focus(&focus) {
        Some(id) => {
            println!("focus: {id}  (h hint, s skip, u unskip, r reset, c check, a run all, f <id> focus, q quit)");
            if config.check_on_start {
                report(handle.send(Command::Check(id)));
            }
        }
        None => println!("all exercises done; edit any exercise to recheck it, q to quit"),
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("read stdin")?;
        let focused = current_focus(&focus);
        match parse_input(&line, focused.as_deref()) {
            Ok(Some(command)) => {
                let quit = command == Command::Quit;
                report(handle.send(command));
                if quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => println!("{message}"),
        }
        let _ = std::io::stdout().flush();
    }
    // EOF on stdin also ends the session; a repeated Quit is rejected harmlessly.
    let _ = handle.send(Command::Quit);

    drop(watcher);
    let record = engine_thread
        .join()
        .map_err(|_| anyhow!("engine thread panicked"))?;
    drop(handle);
    render_thread
        .join()
        .map_err(|_| anyhow!("render thread panicked"))?;

    let done = record.values().filter(|entry| entry.status.is_settled()).count();
    println!("{done}/{} done", record.len());
    Ok(exit_codes::OK)
}

fn current_focus(focus: &Mutex<Option<String>>) -> Option<String> {
    focus.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Translate one stdin line into an engine command.
///
/// Commands that take an id default to the focused exercise.
fn parse_input(line: &str, focus: Option<&str>) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(key) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();
    let target = || {
        arg.or(focus)
            .map(str::to_string)
            .ok_or_else(|| "no exercise in focus; name one".to_string())
    };
    let command = match key {
        "h" => Command::Hint(target()?),
        "s" => Command::Skip(target()?),
        "u" => Command::Unskip(target()?),
        "r" => Command::ResetExercise(target()?),
        "c" => Command::Check(target()?),
        "a" => Command::RunAll,
        "n" | "f" => Command::Focus(
            arg.ok_or_else(|| format!("usage: {key} <exercise id>"))?
                .to_string(),
        ),
        "q" => Command::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Some(command))
}

fn report(result: trainer::engine::CommandResult) {
    match result {
        Ok(CommandAck::Hint(Some(hint))) => println!("hint: {hint}"),
        Ok(CommandAck::Hint(None)) => println!("no hint for this exercise"),
        Ok(CommandAck::RunAllStarted(count)) => println!("run all: checking {count} exercise(s)"),
        Ok(CommandAck::Unchanged) => println!("nothing to do"),
        Ok(CommandAck::Applied) => {}
        Err(err) => println!("error: {err}"),
    }
}

fn render_events(
    rx: Receiver<UiEvent>,
    focus: &Mutex<Option<String>>,
    names: &HashMap<String, String>,
) {
    for event in rx {
        if let UiEvent::CursorAdvanced(id) = &event {
            *focus.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        }
        if event == UiEvent::SessionComplete {
            *focus.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
        println!("{}", render_event(&event, names));
        let _ = std::io::stdout().flush();
    }
}

fn render_event(event: &UiEvent, names: &HashMap<String, String>) -> String {
    match event {
        UiEvent::ExerciseStarted(id) => format!("... checking {id}"),
        UiEvent::ExerciseOutcome {
            id,
            status,
            check,
            diagnostic,
        } => {
            let line = outcome_line(id, *status, *check);
            match diagnostic {
                Some(text) => format!("{line}\n{}", indent(text)),
                None => line,
            }
        }
        UiEvent::CursorAdvanced(id) => match names.get(id) {
            Some(name) if name != id => format!("-> next: {id} ({name})"),
            _ => format!("-> next: {id}"),
        },
        UiEvent::SessionComplete => "all exercises done!".to_string(),
        UiEvent::ProgressNotSaved { reason } => format!("! progress not saved: {reason}"),
        UiEvent::RunAllFinished { checked, failed } => {
            if failed.is_empty() {
                format!("run all: {} checked, all passed", checked.len())
            } else {
                format!(
                    "run all: {} checked, failed: {}",
                    checked.len(),
                    failed.join(", ")
                )
            }
        }
    }
}

fn outcome_line(id: &str, status: ExerciseStatus, check: Option<CheckStatus>) -> String {
    match (status, check) {
        (_, Some(CheckStatus::TimedOut)) => format!("x {id} timed out"),
        (_, Some(CheckStatus::Errored)) => format!("! {id} could not be run"),
        (ExerciseStatus::Done, _) => format!("ok {id} passed"),
        (ExerciseStatus::Failed, _) => format!("x {id} failed"),
        (ExerciseStatus::Skipped, _) => format!("- {id} skipped"),
        (ExerciseStatus::Pending, _) => format!("  {id} is pending"),
        (ExerciseStatus::Running, _) => format!("... {id} running"),
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_watch_flags() {
        let cli = Cli::parse_from(["trainer", "--root", "/tmp/ws", "watch", "--restore"]);
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/ws")));
        assert!(matches!(
            cli.command,
            CliCommand::Watch {
                restore: true,
                fresh: false
            }
        ));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["trainer", "init", "--force"]);
        assert!(matches!(cli.command, CliCommand::Init { force: true }));
    }

    #[test]
    fn keys_default_to_focused_exercise() {
        assert_eq!(
            parse_input("h", Some("ex02")),
            Ok(Some(Command::Hint("ex02".to_string())))
        );
        assert_eq!(
            parse_input("s ex05", Some("ex02")),
            Ok(Some(Command::Skip("ex05".to_string())))
        );
        assert_eq!(parse_input("a", None), Ok(Some(Command::RunAll)));
        assert_eq!(parse_input("q", None), Ok(Some(Command::Quit)));
        assert_eq!(parse_input("   ", None), Ok(None));
    }

    #[test]
    fn focus_requires_an_id() {
        assert_eq!(
            parse_input("f ex03", Some("ex01")),
            Ok(Some(Command::Focus("ex03".to_string())))
        );
        assert!(parse_input("f", Some("ex01")).is_err());
        assert!(parse_input("c", None).is_err());
        assert!(parse_input("x", None).is_err());
    }

    #[test]
    fn failed_outcome_renders_indented_diagnostic() {
        let event = UiEvent::ExerciseOutcome {
            id: "ex01".to_string(),
            status: ExerciseStatus::Failed,
            check: Some(CheckStatus::Failed),
            diagnostic: Some("NameError: x\nline 2".to_string()),
        };
        assert_eq!(
            render_event(&event, &HashMap::new()),
            "x ex01 failed\n    NameError: x\n    line 2"
        );
    }
}
