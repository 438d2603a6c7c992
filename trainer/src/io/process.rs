//! Running check processes with a timeout, cancellation and bounded output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;
use crate::error::CheckExecutionError;

/// How often a running child is re-checked for cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why the child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEnd {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub end: ProcessEnd,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        matches!(self.end, ProcessEnd::Exited(status) if status.success())
    }

    /// Stdout followed by stderr as text, with truncation notices.
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            text.push_str(&format!("\n[stdout truncated {} bytes]\n", self.stdout_truncated));
        }
        if !self.stderr.is_empty() && !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            text.push_str(&format!("\n[stderr truncated {} bytes]\n", self.stderr_truncated));
        }
        text
    }
}

/// Kills and reaps the child if it is dropped before being waited on.
///
/// On unix the child leads its own process group and the whole group is
/// killed, so helpers it spawned cannot keep the output pipes open.
struct ReapOnDrop {
    child: Child,
    reaped: bool,
}

impl ReapOnDrop {
    fn kill_and_wait(&mut self) -> std::io::Result<ExitStatus> {
        kill_process_group(&self.child);
        // Fails only when the child already exited; the wait below still reaps it.
        let _ = self.child.kill();
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for ReapOnDrop {
    fn drop(&mut self) {
        if !self.reaped {
            kill_process_group(&self.child);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg only sends a signal. The group id is the child's pid, and
    // the child was made a group leader by `isolate_process_group`. ESRCH means
    // the group is already empty.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Run a command until it exits, times out or `cancel` fires.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// The child and its process group are killed and reaped before this returns on every path.
/// Readers get at most [`OUTPUT_GRACE`] after that to see the pipes close; a pipe still held by
/// an escaped descendant is abandoned with whatever was captured so far.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_command_cancellable(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<CommandOutput, CheckExecutionError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    debug!(program = ?cmd.get_program(), "spawning check process");
    let started = Instant::now();
    let child = cmd.spawn().map_err(|source| {
        error!(err = %source, "failed to spawn check process");
        CheckExecutionError::Launch {
            program: cmd.get_program().to_string_lossy().into_owned(),
            source,
        }
    })?;
    let mut guard = ReapOnDrop {
        child,
        reaped: false,
    };

    let stdout = guard.child.stdout.take().ok_or(CheckExecutionError::Io {
        action: "capture stdout",
        source: std::io::Error::other("stdout was not piped"),
    })?;
    let stderr = guard.child.stderr.take().ok_or(CheckExecutionError::Io {
        action: "capture stderr",
        source: std::io::Error::other("stderr was not piped"),
    })?;
    let stdout_reader = StreamReader::spawn(stdout, output_limit_bytes);
    let stderr_reader = StreamReader::spawn(stderr, output_limit_bytes);

    let end = loop {
        if cancel.is_cancelled() {
            debug!("check cancelled, killing");
            guard.kill_and_wait().map_err(|source| CheckExecutionError::Io {
                action: "reap cancelled check",
                source,
            })?;
            break ProcessEnd::Cancelled;
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            warn!(timeout_ms = timeout.as_millis() as u64, "check timed out, killing");
            guard.kill_and_wait().map_err(|source| CheckExecutionError::Io {
                action: "reap timed out check",
                source,
            })?;
            break ProcessEnd::TimedOut;
        }
        let slice = (timeout - elapsed).min(POLL_INTERVAL);
        match guard.child.wait_timeout(slice) {
            Ok(Some(status)) => {
                guard.reaped = true;
                break ProcessEnd::Exited(status);
            }
            Ok(None) => {}
            Err(source) => {
                return Err(CheckExecutionError::Io {
                    action: "wait for check",
                    source,
                });
            }
        }
    };
    // Background helpers left behind by a clean exit go too.
    kill_process_group(&guard.child);

    let deadline = Instant::now() + OUTPUT_GRACE;
    let stdout = stdout_reader.finish(deadline)?;
    let stderr = stderr_reader.finish(deadline)?;

    if stdout.truncated > 0 || stderr.truncated > 0 {
        warn!(
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "output truncated"
        );
    }

    let elapsed = started.elapsed();
    debug!(end = ?end, elapsed_ms = elapsed.as_millis() as u64, "check process finished");
    Ok(CommandOutput {
        end,
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        stdout_truncated: stdout.truncated,
        stderr_truncated: stderr.truncated,
        elapsed,
    })
}

/// How long readers may keep draining after the child is gone.
pub const OUTPUT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// A pipe drained on its own thread into a shared, bounded buffer.
struct StreamReader {
    captured: Arc<Mutex<Captured>>,
    done: Receiver<std::io::Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let sink = Arc::clone(&captured);
        let (tx, done) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(read_stream_limited(reader, limit, &sink));
        });
        Self { captured, done }
    }

    /// Wait for the pipe to close, but never past `deadline`.
    fn finish(self, deadline: Instant) -> Result<Captured, CheckExecutionError> {
        match self.done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(CheckExecutionError::Io {
                    action: "read check output",
                    source,
                });
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("output pipe still open after the check ended, abandoning reader");
            }
            Err(RecvTimeoutError::Disconnected) => return Err(CheckExecutionError::ReaderPanicked),
        }
        let mut captured = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(std::mem::take(&mut *captured))
    }
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    sink: &Mutex<Captured>,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = limit.saturating_sub(captured.bytes.len());
        let keep = n.min(remaining);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }
}
