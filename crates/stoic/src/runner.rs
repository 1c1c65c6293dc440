//! Supervises a single child process: start, wait, back off, restart.
//!
//! [`Runner::start`] hands the execution loop to a background thread. The
//! loop owns the [`Child`] handle while it waits; only the process id is kept
//! in the shared state so that [`Runner::restart`] and [`Runner::shutdown`]
//! can signal the child without contending with the blocking `wait`.
//!
//! Shared state lives behind one mutex paired with one condition variable.
//! The shutdown flag is checked before every spawn and after every exit, and
//! spawning happens with the lock held, so a shutdown request can delay the
//! loop by at most one child generation but is never lost.

use std::fmt;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::log::{RunnerLoggers, Severity};
use crate::relay::relay;

pub(crate) const RUNNER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::runner");

/// Program and argument vector for the supervised child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCommand {
    argv0: String,
    args: Vec<String>,
    executable: Option<PathBuf>,
}

impl ChildCommand {
    /// Builds a command from a non-empty argument vector.
    pub fn new(argv: Vec<String>) -> Result<Self, RunnerError> {
        let mut argv = argv.into_iter();
        let argv0 = argv.next().ok_or(RunnerError::EmptyCommand)?;
        Ok(Self {
            argv0,
            args: argv.collect(),
            executable: None,
        })
    }

    /// Executes `executable` while still presenting `argv[0]` to the child.
    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// Program image that will be executed.
    #[must_use]
    pub fn program(&self) -> &Path {
        self.executable
            .as_deref()
            .unwrap_or_else(|| Path::new(&self.argv0))
    }

    fn spawn(&self) -> io::Result<Child> {
        let mut command = Command::new(self.program());
        if self.executable.is_some() {
            command.arg0(&self.argv0);
        }
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

impl fmt::Display for ChildCommand {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.argv0)?;
        for arg in &self.args {
            write!(formatter, " {arg}")?;
        }
        Ok(())
    }
}

/// Errors surfaced by the process runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// No program was configured.
    #[error("child command must contain at least one argument")]
    EmptyCommand,
    /// `start` was called on a runner whose loop is already active.
    #[error("runner has already been started")]
    AlreadyStarted,
    /// The execution loop thread could not be created.
    #[error("failed to spawn runner thread: {source}")]
    SpawnThread {
        #[source]
        source: io::Error,
    },
    /// The execution loop thread panicked.
    #[error("runner thread panicked")]
    ThreadPanic,
}

struct RunnerState {
    child: Option<Pid>,
    shutting_down: bool,
    restart_requested: bool,
    backoff: Backoff,
}

struct Shared {
    state: Mutex<RunnerState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RunnerState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Keeps one child process alive until shutdown.
pub struct Runner {
    command: ChildCommand,
    loggers: RunnerLoggers,
    shared: Arc<Shared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Runner {
    /// Creates an idle runner; nothing is spawned until [`Runner::start`].
    #[must_use]
    pub fn new(command: ChildCommand, loggers: RunnerLoggers, default_backoff: Duration) -> Self {
        Self {
            command,
            loggers,
            shared: Arc::new(Shared {
                state: Mutex::new(RunnerState {
                    child: None,
                    shutting_down: false,
                    restart_requested: false,
                    backoff: Backoff::new(default_backoff),
                }),
                wake: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Launches the execution loop on a background thread and returns.
    pub fn start(&self) -> Result<(), RunnerError> {
        let mut worker = self
            .worker
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if worker.is_some() {
            return Err(RunnerError::AlreadyStarted);
        }
        let shared = Arc::clone(&self.shared);
        let command = self.command.clone();
        let loggers = self.loggers.clone();
        let handle = thread::Builder::new()
            .name(concat!(env!("CARGO_PKG_NAME"), "-runner").to_owned())
            .spawn(move || run_loop(&shared, &command, &loggers))
            .map_err(|source| RunnerError::SpawnThread { source })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Terminates the current child so the loop starts a fresh one.
    ///
    /// A pending backoff sleep is cut short. Does not wait for the new child.
    pub fn restart(&self) {
        let mut state = self.shared.lock();
        if let Some(pid) = state.child {
            self.loggers
                .process
                .log(Severity::Info, format_args!("restart requested"));
            terminate(pid);
        }
        state.restart_requested = true;
        self.shared.wake.notify_all();
    }

    /// Stops the loop, terminating the current child, and waits for it to exit.
    ///
    /// Calling this more than once is harmless.
    pub fn shutdown(&self) -> Result<(), RunnerError> {
        self.request_shutdown();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        match handle {
            Some(handle) => handle.join().map_err(|_| RunnerError::ThreadPanic),
            None => Ok(()),
        }
    }

    /// Process id of the running child, if any.
    #[must_use]
    pub fn child_id(&self) -> Option<u32> {
        self.shared
            .lock()
            .child
            .and_then(|pid| u32::try_from(pid.as_raw()).ok())
    }

    fn request_shutdown(&self) {
        let mut state = self.shared.lock();
        if !state.shutting_down {
            debug!(target: RUNNER_TARGET, "runner shutdown requested");
        }
        state.shutting_down = true;
        if let Some(pid) = state.child {
            terminate(pid);
        }
        self.shared.wake.notify_all();
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Runner")
            .field("command", &self.command)
            .field("child", &self.child_id())
            .finish_non_exhaustive()
    }
}

fn run_loop(shared: &Shared, command: &ChildCommand, loggers: &RunnerLoggers) {
    loop {
        let child = {
            let mut state = shared.lock();
            if state.shutting_down {
                loggers.process.log(
                    Severity::Info,
                    format_args!("shutdown requested; child will not be respawned"),
                );
                return;
            }
            let verb = if state.backoff.has_history() {
                "restarting"
            } else {
                "starting"
            };
            loggers
                .process
                .log(Severity::Info, format_args!("{verb} {command}"));
            state.restart_requested = false;
            match command.spawn() {
                Ok(child) => {
                    state.child = i32::try_from(child.id()).ok().map(Pid::from_raw);
                    Some(child)
                }
                Err(error) => {
                    loggers.process.log(
                        Severity::Error,
                        format_args!("failed to spawn {}: {error}", command.program().display()),
                    );
                    None
                }
            }
        };

        let status = child.map(|child| supervise(child, shared, loggers));

        let delay = {
            let mut state = shared.lock();
            match status {
                Some(Ok(status)) => loggers.process.log(
                    Severity::Info,
                    format_args!("child exited with {}", ExitReport(status)),
                ),
                Some(Err(error)) => loggers.process.log(
                    Severity::Error,
                    format_args!("failed to wait for child: {error}"),
                ),
                None => {}
            }
            if state.shutting_down {
                loggers.process.log(
                    Severity::Info,
                    format_args!("shutdown requested; child will not be respawned"),
                );
                return;
            }
            state.backoff.next_delay(Instant::now())
        };

        if let Some(delay) = delay {
            loggers.process.log(
                Severity::Warn,
                format_args!("backing off for {:.3}s", delay.as_secs_f64()),
            );
            let state = shared.lock();
            let (mut state, _) = shared
                .wake
                .wait_timeout_while(state, delay, |state| {
                    !state.shutting_down && !state.restart_requested
                })
                .unwrap_or_else(|poison| poison.into_inner());
            state.backoff.restarted_at(Instant::now());
        }
    }
}

/// Relays both output pipes and blocks until the child and its pipes close.
///
/// The published pid is cleared as soon as the child is reaped, even when a
/// descendant keeps the pipes open, so it is never signalled after reuse.
fn supervise(
    mut child: Child,
    shared: &Shared,
    loggers: &RunnerLoggers,
) -> io::Result<ExitStatus> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    thread::scope(|scope| {
        if let Some(stdout) = stdout {
            scope.spawn(|| relay(stdout, loggers.stdout.as_ref(), Severity::Info));
        }
        if let Some(stderr) = stderr {
            scope.spawn(|| relay(stderr, loggers.stderr.as_ref(), Severity::Error));
        }
        let status = child.wait();
        shared.lock().child = None;
        status
    })
}

fn terminate(pid: Pid) {
    match kill(pid, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => {
            warn!(
                target: RUNNER_TARGET,
                pid = pid.as_raw(),
                error = %errno,
                "failed to signal child"
            );
        }
    }
}

struct ExitReport(ExitStatus);

impl fmt::Display for ExitReport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.0.code(), self.0.signal()) {
            (Some(code), _) => write!(formatter, "code {code}"),
            (None, Some(signal)) => write!(formatter, "signal {signal}"),
            (None, None) => formatter.write_str("unknown status"),
        }
    }
}
