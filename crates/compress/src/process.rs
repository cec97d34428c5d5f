//! Streaming through external decoder processes.
//!
//! [`pipe`] starts a command with the caller's stream on its standard input
//! and hands back a [`ProcessReader`] over its standard output. Three
//! detached threads keep the process going independently of how fast the
//! caller reads:
//!
//! - a *feeder* copying the input stream into the process,
//! - a *collector* capturing standard error for diagnostics,
//! - a *supervisor* waiting for the process to exit.
//!
//! The supervisor delivers exactly one verdict per process. The reader picks
//! it up once standard output is exhausted: a clean exit is a normal
//! end-of-data, anything else is an [`io::Error`] wrapping a [`ProcessError`]
//! with the captured standard error attached. There is no other status
//! channel.
//!
//! The supervisor polls for exit every [`EXIT_POLL_INTERVAL`] rather than
//! blocking in `wait`, because a blocked `wait` would leave nobody able to
//! kill the process. The price is up to one interval of extra latency
//! between the process exiting and the final read returning, plus one
//! wake-up per interval for each live process.
//!
//! Dropping the reader early cancels the supervisor, which kills and reaps
//! the process. The feeder can't be interrupted while it's blocked reading
//! from the input stream: if that stream never yields, the feeder thread (and
//! the input it owns) stays parked until it does.

use crate::error::{ErrorKind, ProcessError, Result};
use exn::ResultExt;
use std::io::{self, Read};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError};
use std::thread;
use std::time::Duration;

/// How often the supervisor checks whether the process has exited. Bounds
/// both the end-of-stream latency and how quickly a cancelled process dies.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

type Verdict = std::result::Result<(), ProcessError>;

/// Run `command` with `input` as its standard input, and return a reader over
/// its standard output.
///
/// Standard input, output and error of `command` are replaced with pipes.
/// Failing to start the process is reported here, before any stream is handed
/// back; failures after that are reported by [`ProcessReader`].
///
/// # Examples
///
/// ```no_run
/// use archive_compress::process;
/// use std::io::{Cursor, Read};
/// use std::process::Command;
///
/// let mut command = Command::new("xz");
/// command.args(["-d", "-c", "-q"]);
/// let compressed = std::fs::read("layer.tar.xz").unwrap();
/// let mut reader = process::pipe(command, Cursor::new(compressed)).unwrap();
/// let mut tar = Vec::new();
/// reader.read_to_end(&mut tar).unwrap();
/// ```
pub fn pipe<R>(mut command: Command, input: R) -> Result<ProcessReader>
where
    R: Read + Send + 'static,
{
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .or_raise(|| ErrorKind::Spawn(program.clone()))?;
    tracing::debug!(program = %program, pid = child.id(), "Spawned external process");

    match Wiring::connect(&mut child, &program, input) {
        Ok(wiring) => Ok(wiring.hand_over(child, program)),
        Err(err) => {
            // Don't leave a half-wired process behind.
            if let Err(kill) = child.kill() {
                tracing::debug!(program = %program, error = %kill, "Could not kill half-started process");
            }
            let _ = child.wait();
            Err(err).or_raise(|| ErrorKind::Spawn(program.clone()))
        },
    }
}

/// Helper threads and channels wired around a freshly spawned child, waiting
/// for the child itself to be handed to the supervisor.
struct Wiring {
    stdout: ChildStdout,
    feeder: Receiver<io::Error>,
    stderr: thread::JoinHandle<String>,
    supervisor: Sender<Supervisor>,
}

impl Wiring {
    fn connect<R>(child: &mut Child, program: &str, mut input: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let missing = |stream| io::Error::other(format!("child {stream} was not captured"));
        let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        // Started first and handed the child last, so that any failure to
        // start a thread leaves the child with the caller, who kills it.
        let (supervisor, supervisor_rx) = mpsc::channel::<Supervisor>();
        thread::Builder::new().name(format!("{program}-wait")).spawn(move || {
            if let Ok(supervisor) = supervisor_rx.recv() {
                supervisor.run();
            }
        })?;

        let (feeder_tx, feeder) = mpsc::channel();
        thread::Builder::new().name(format!("{program}-stdin")).spawn(move || {
            let copied = io::copy(&mut input, &mut stdin);
            // Report before closing stdin, so the outcome is already queued by
            // the time the process sees end-of-input and exits.
            match copied {
                Ok(_) => {},
                // The process stopped reading; its exit status says whether that was fine.
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {},
                Err(err) => {
                    let _ = feeder_tx.send(err);
                },
            }
            drop(stdin);
        })?;

        let stderr = thread::Builder::new().name(format!("{program}-stderr")).spawn(move || {
            let mut captured = Vec::new();
            if let Err(err) = stderr.read_to_end(&mut captured) {
                tracing::trace!(error = %err, "Stopped capturing stderr early");
            }
            String::from_utf8_lossy(&captured).into_owned()
        })?;

        Ok(Self { stdout, feeder, stderr, supervisor })
    }

    fn hand_over(self, child: Child, program: String) -> ProcessReader {
        let Wiring { stdout, feeder, stderr, supervisor } = self;
        let pid = child.id();
        let (cancel_tx, cancel) = mpsc::channel::<()>();
        let (verdict_tx, verdict) = mpsc::sync_channel(1);
        let handoff = supervisor.send(Supervisor { child, program, cancel, feeder, stderr, verdict: verdict_tx });
        if let Err(mpsc::SendError(orphan)) = handoff {
            // The waiting thread is gone. Without a supervisor the reader
            // sees a dropped verdict channel and fails instead of hanging.
            tracing::warn!(program = %orphan.program, "Process supervisor unavailable");
            orphan.terminate();
        }
        ProcessReader { pid, stdout: Some(stdout), verdict, _cancel: cancel_tx, state: State::Streaming }
    }
}

/// Owns the child process until it exits or the reader goes away.
struct Supervisor {
    child: Child,
    program: String,
    cancel: Receiver<()>,
    feeder: Receiver<io::Error>,
    stderr: thread::JoinHandle<String>,
    verdict: SyncSender<Verdict>,
}

impl Supervisor {
    fn run(mut self) {
        let status = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break Ok(status),
                Ok(None) => {},
                Err(err) => break Err(err),
            }
            match self.cancel.recv_timeout(EXIT_POLL_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => continue,
                // Nothing is ever sent; a disconnect means the reader was dropped.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return self.terminate(),
            }
        };
        let verdict = self.verdict.clone();
        // The reader may already be gone; nobody is left to tell.
        let _ = verdict.send(self.judge(status));
    }

    fn judge(self, status: io::Result<ExitStatus>) -> Verdict {
        let Supervisor { program, feeder, stderr, .. } = self;
        // A panicked collector just means there's nothing to show.
        let stderr = stderr.join().unwrap_or_default();
        match status {
            Ok(status) if status.success() => match feeder.try_recv() {
                Ok(err) => Err(ProcessError::new(program, format_args!("failed to read input: {err}"), stderr)),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                    tracing::debug!(program = %program, "External process finished");
                    Ok(())
                },
            },
            Ok(status) => {
                tracing::warn!(program = %program, %status, stderr = stderr.trim(), "External process failed");
                Err(ProcessError::new(program, status, stderr))
            },
            Err(err) => Err(ProcessError::new(program, format_args!("failed to wait: {err}"), stderr)),
        }
    }

    fn terminate(mut self) {
        tracing::debug!(program = %self.program, pid = self.child.id(), "Reader closed early; killing external process");
        if let Err(err) = self.child.kill() {
            tracing::debug!(program = %self.program, error = %err, "Could not kill external process");
        }
        // Reap it; killed processes exit promptly.
        let _ = self.child.wait();
    }
}

enum State {
    Streaming,
    Finished,
    Failed(ProcessError),
}

/// Standard output of a process started by [`pipe`].
///
/// Reads return the process output as it is produced. Once it is exhausted,
/// the next read returns either end-of-data (the process exited successfully)
/// or an error wrapping a [`ProcessError`]; that outcome is terminal and is
/// repeated by every later read.
///
/// Dropping the reader before the process has finished kills the process.
pub struct ProcessReader {
    pid: u32,
    stdout: Option<ChildStdout>,
    verdict: Receiver<Verdict>,
    // Never sent on: dropping it is the cancellation signal.
    _cancel: Sender<()>,
    state: State,
}

impl ProcessReader {
    /// OS-assigned process identifier of the external process.
    pub fn id(&self) -> u32 {
        self.pid
    }

    /// Stop reading and tear the process down. Same as dropping the reader.
    pub fn close(self) {}

    fn conclude(&mut self) {
        self.stdout = None;
        self.state = match self.verdict.recv() {
            Ok(Ok(())) => State::Finished,
            Ok(Err(err)) => State::Failed(err),
            Err(_) => State::Failed(ProcessError::new("external process", "supervisor exited without a verdict", "")),
        };
    }
}

impl Read for ProcessReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let State::Streaming = self.state
            && let Some(stdout) = self.stdout.as_mut()
        {
            let read = stdout.read(buf)?;
            if read > 0 || buf.is_empty() {
                return Ok(read);
            }
            self.conclude();
        }
        match &self.state {
            State::Failed(err) => Err(err.clone().into()),
            State::Streaming | State::Finished => Ok(0),
        }
    }
}

impl std::fmt::Debug for ProcessReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Streaming => "streaming",
            State::Finished => "finished",
            State::Failed(_) => "failed",
        };
        f.debug_struct("ProcessReader").field("pid", &self.pid).field("state", &state).finish_non_exhaustive()
    }
}
