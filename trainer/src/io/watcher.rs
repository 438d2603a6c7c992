//! Filesystem watching for exercise edits.
//!
//! The notify callback only forwards raw events into a channel; a dedicated
//! thread maps paths to exercise ids, debounces bursts and hands each settled
//! id to the caller's sink (normally the engine queue).
//!
//! [`spawn_supervised_watcher`] adds a supervisor thread: a watch error ends
//! the debounce thread, and the supervisor tears the watcher down and builds a
//! new one. When that fails too the caller is told to fall back to manual checks.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::core::debounce::Debouncer;
use crate::core::path_map::ExercisePathMap;
use crate::error::WatcherError;
use crate::exercise::ExerciseCollection;

/// Upper bound on how long the debounce thread sleeps with nothing pending.
const IDLE_WAIT: Duration = Duration::from_secs(1);
/// Pause between failed attempts to establish the watcher.
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Messages to the supervisor thread.
#[derive(Debug)]
enum Signal {
    /// The debounce thread hit a watch error and exited.
    Fault(notify::Error),
    Stop,
}

/// Keeps the watcher alive. Dropping it stops watching and ends the thread.
pub struct WatcherHandle {
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Stop watching and wait for the debounce thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the watcher drops the raw sender, which ends the thread.
        self.watcher.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("watcher thread panicked");
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Where and how to watch; kept by the supervisor to rebuild the watcher.
#[derive(Clone)]
struct WatchTarget {
    root: PathBuf,
    map: ExercisePathMap,
    window: Duration,
}

impl WatchTarget {
    fn new(exercises_dir: &Path, collection: &ExerciseCollection, window: Duration) -> Self {
        let root =
            fs::canonicalize(exercises_dir).unwrap_or_else(|_| exercises_dir.to_path_buf());
        let map = ExercisePathMap::new(root.clone(), collection);
        Self { root, map, window }
    }

    fn start<F>(&self, emit: F, faults: Option<Sender<Signal>>) -> Result<WatcherHandle, WatcherError>
    where
        F: FnMut(String) -> bool + Send + 'static,
    {
        let (raw_tx, raw_rx) = mpsc::channel::<notify::Result<NotifyEvent>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| {
            let _ = raw_tx.send(res);
        })
        .map_err(WatcherError::Create)?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|source| WatcherError::Watch {
                path: self.root.clone(),
                source,
            })?;

        let map = self.map.clone();
        let debouncer = Debouncer::new(self.window);
        let thread = thread::Builder::new()
            .name("trainer-watch".to_string())
            .spawn(move || debounce_loop(raw_rx, map, debouncer, emit, faults))
            .map_err(WatcherError::Thread)?;

        info!(
            path = %self.root.display(),
            window_ms = self.window.as_millis() as u64,
            "watching exercises"
        );
        Ok(WatcherHandle {
            watcher: Some(watcher),
            thread: Some(thread),
        })
    }

    fn start_with_retries<F>(
        &self,
        attempts: u32,
        emit: &F,
        faults: Option<&Sender<Signal>>,
    ) -> Result<WatcherHandle, WatcherError>
    where
        F: FnMut(String) -> bool + Clone + Send + 'static,
    {
        let mut attempt = 1;
        loop {
            match self.start(emit.clone(), faults.cloned()) {
                Ok(handle) => return Ok(handle),
                Err(err) if attempt < attempts => {
                    warn!(attempt, attempts, err = %err, "watcher start failed, retrying");
                    thread::sleep(RETRY_DELAY);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Watch `exercises_dir` recursively and call `emit` with the id of each
/// exercise whose file settled after a burst of writes.
///
/// `emit` returns false when the receiver is gone; the thread then exits.
/// Watch errors are logged and watching continues as well as it can.
pub fn spawn_watcher<F>(
    exercises_dir: &Path,
    collection: &ExerciseCollection,
    window: Duration,
    emit: F,
) -> Result<WatcherHandle, WatcherError>
where
    F: FnMut(String) -> bool + Send + 'static,
{
    WatchTarget::new(exercises_dir, collection, window).start(emit, None)
}

/// A watcher that rebuilds itself after runtime watch errors.
///
/// Dropping it stops the supervisor and the current watcher.
pub struct SupervisedWatcher {
    signals: Sender<Signal>,
    thread: Option<JoinHandle<()>>,
}

impl SupervisedWatcher {
    /// Stop the supervisor and the watcher it currently owns.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for SupervisedWatcher {
    fn drop(&mut self) {
        // The supervisor may already be gone after degrading.
        let _ = self.signals.send(Signal::Stop);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("watch supervisor panicked");
        }
    }
}

/// Like [`spawn_watcher`], retried up to `attempts` times; a watch error at
/// runtime triggers a fresh round of attempts.
///
/// The first start happens before returning, so an unusable directory is
/// reported as an error. If a later restart fails, `on_degraded` runs once on
/// the supervisor thread and watching stays off for the rest of the session.
pub fn spawn_supervised_watcher<F, D>(
    exercises_dir: &Path,
    collection: &ExerciseCollection,
    window: Duration,
    attempts: u32,
    emit: F,
    on_degraded: D,
) -> Result<SupervisedWatcher, WatcherError>
where
    F: FnMut(String) -> bool + Clone + Send + 'static,
    D: FnOnce(&WatcherError) + Send + 'static,
{
    let target = WatchTarget::new(exercises_dir, collection, window);
    let (signals_tx, signals_rx) = mpsc::channel();
    let first = target.start_with_retries(attempts, &emit, Some(&signals_tx))?;
    let faults = signals_tx.clone();
    let thread = thread::Builder::new()
        .name("trainer-watch-supervisor".to_string())
        .spawn(move || {
            supervise(target, attempts, first, emit, &signals_rx, &faults, on_degraded);
        })
        .map_err(WatcherError::Thread)?;
    Ok(SupervisedWatcher {
        signals: signals_tx,
        thread: Some(thread),
    })
}

fn supervise<F, D>(
    target: WatchTarget,
    attempts: u32,
    first: WatcherHandle,
    emit: F,
    signals: &Receiver<Signal>,
    faults: &Sender<Signal>,
    on_degraded: D,
) where
    F: FnMut(String) -> bool + Clone + Send + 'static,
    D: FnOnce(&WatcherError),
{
    let mut current = Some(first);
    let mut restarts = 0u32;
    while let Ok(signal) = signals.recv() {
        let err = match signal {
            Signal::Stop => break,
            Signal::Fault(err) => err,
        };
        if let Some(handle) = current.take() {
            handle.stop();
        }
        restarts += 1;
        warn!(err = %err, restarts, "filesystem watch failed, restarting watcher");
        match target.start_with_retries(attempts, &emit, Some(faults)) {
            Ok(handle) => current = Some(handle),
            Err(err) => {
                warn!(err = %err, "watcher restart failed, watching disabled");
                on_degraded(&err);
                break;
            }
        }
    }
    debug!("watch supervisor stopped");
}

/// Drain raw events until the watcher goes away.
///
/// With `faults` set, a watch error is forwarded there and ends the loop so
/// the supervisor can rebuild the watcher.
fn debounce_loop<F>(
    raw_rx: Receiver<notify::Result<NotifyEvent>>,
    map: ExercisePathMap,
    mut debouncer: Debouncer,
    mut emit: F,
    faults: Option<Sender<Signal>>,
) where
    F: FnMut(String) -> bool,
{
    loop {
        let wait = debouncer
            .next_deadline(Instant::now())
            .unwrap_or(IDLE_WAIT);
        match raw_rx.recv_timeout(wait) {
            Ok(Ok(event)) => {
                for id in changed_exercises(&map, &event) {
                    debouncer.record(&id, Instant::now());
                }
            }
            Ok(Err(err)) => match &faults {
                Some(faults) => {
                    let _ = faults.send(Signal::Fault(err));
                    return;
                }
                None => warn!(err = %err, "filesystem watch error"),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("watcher stopped");
                return;
            }
        }
        for id in debouncer.drain_ready(Instant::now()) {
            debug!(exercise = %id, "exercise changed");
            if !emit(id) {
                debug!("change receiver gone, stopping watcher thread");
                return;
            }
        }
    }
}

/// Exercise ids touched by one raw event, in path order without repeats.
///
/// Only content-affecting events count; metadata-only changes and removals
/// are ignored.
pub fn changed_exercises(map: &ExercisePathMap, event: &NotifyEvent) -> Vec<String> {
    let relevant = match event.kind {
        EventKind::Create(_) | EventKind::Any => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };
    if !relevant {
        return Vec::new();
    }
    let mut ids: Vec<String> = Vec::new();
    for path in &event.paths {
        if let Some(id) = resolve(map, path)
            && !ids.iter().any(|existing| existing == id)
        {
            ids.push(id.to_string());
        }
    }
    ids
}

fn resolve<'a>(map: &'a ExercisePathMap, path: &Path) -> Option<&'a str> {
    map.resolve(path).or_else(|| {
        let canonical: PathBuf = fs::canonicalize(path).ok()?;
        map.resolve(&canonical)
    })
}
