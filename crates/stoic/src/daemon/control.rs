//! Start sequence and accept loop for the control socket.

use std::env;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use stoic_config::RuntimePaths;

use super::daemonizer::{Daemonizer, Detached};
use super::errors::{DaemonError, HookError, HookStage};
use super::socket::{bind_control_socket, remove_socket_file};
use super::{CONTROL_READ_TIMEOUT, DAEMON_TARGET, FOREGROUND_ENV_VAR, SHUTDOWN_SENTINEL};

const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Launch mode for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; primarily used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    /// Chooses foreground mode when requested explicitly or via the environment.
    #[must_use]
    pub fn detect(foreground: bool) -> Self {
        if foreground || env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// Behaviour driven by the control plane once the socket is listening.
pub trait Service {
    /// Runs once before the accept loop begins.
    fn setup(&mut self) -> Result<(), HookError>;

    /// Runs once after a shutdown request, before it is acknowledged.
    fn teardown(&mut self) -> Result<(), HookError>;
}

/// How `start` finished in the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// This is the invoking process; the daemon carries on elsewhere.
    Detached,
    /// The daemon served until shutdown and has cleaned up.
    Stopped,
}

/// Collaborators and paths needed to bring the control plane up.
pub struct ControlPlan<D> {
    pub paths: RuntimePaths,
    pub mode: LaunchMode,
    pub daemonizer: D,
    /// Descriptors that must survive the close-all step, besides the socket.
    pub preserved_fds: Vec<RawFd>,
}

/// Binds the control socket, detaches if requested, and serves `service`.
///
/// Returns [`StartOutcome::Detached`] in the invoking process when running in
/// background mode. The daemon itself returns [`StartOutcome::Stopped`] once
/// a shutdown request has been handled.
pub fn start<D, S>(plan: ControlPlan<D>, service: &mut S) -> Result<StartOutcome, DaemonError>
where
    D: Daemonizer,
    S: Service,
{
    let ControlPlan {
        paths,
        mode,
        daemonizer,
        mut preserved_fds,
    } = plan;
    info!(
        target: DAEMON_TARGET,
        ?mode,
        socket = %paths.socket_path().display(),
        "starting daemon"
    );
    let listener = bind_control_socket(&paths)?;

    if matches!(mode, LaunchMode::Background) {
        preserved_fds.push(listener.as_raw_fd());
        match daemonizer.daemonize(&preserved_fds)? {
            Detached::Parent => return Ok(StartOutcome::Detached),
            Detached::Daemon => {}
        }
        info!(
            target: DAEMON_TARGET,
            pid = std::process::id(),
            "daemon process detached"
        );
    }

    serve(listener, paths.socket_path(), service)?;
    Ok(StartOutcome::Stopped)
}

fn serve<S: Service>(
    listener: UnixListener,
    socket: &Path,
    service: &mut S,
) -> Result<(), DaemonError> {
    if let Err(source) = service.setup() {
        drop(listener);
        remove_socket_file(socket);
        return Err(DaemonError::Hook {
            stage: HookStage::Setup,
            source,
        });
    }

    let requester = listen(&listener);
    info!(target: DAEMON_TARGET, "shutdown requested");
    let teardown = service.teardown();
    drop(listener);
    remove_socket_file(socket);
    acknowledge(requester);

    teardown.map_err(|source| DaemonError::Hook {
        stage: HookStage::Teardown,
        source,
    })?;
    info!(target: DAEMON_TARGET, "shutdown sequence completed");
    Ok(())
}

/// Accepts connections until one delivers the shutdown sentinel.
///
/// Any other byte, an empty connection, or a read error just drops that
/// connection. The requesting stream is returned so it can be acknowledged
/// after teardown.
pub(crate) fn listen(listener: &UnixListener) -> UnixStream {
    info!(target: DAEMON_TARGET, "control socket accepting connections");
    let mut last_error = None::<io::ErrorKind>;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                last_error = None;
                if let Some(stream) = read_request(stream) {
                    return stream;
                }
            }
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: DAEMON_TARGET,
                        error = %error,
                        "control socket accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

fn read_request(mut stream: UnixStream) -> Option<UnixStream> {
    if let Err(error) = stream.set_read_timeout(Some(CONTROL_READ_TIMEOUT)) {
        debug!(target: DAEMON_TARGET, error = %error, "failed to set read timeout");
        return None;
    }
    let mut byte = [0_u8; 1];
    match stream.read(&mut byte) {
        Ok(1) if byte[0] == SHUTDOWN_SENTINEL => Some(stream),
        Ok(0) => None,
        Ok(_) => {
            debug!(
                target: DAEMON_TARGET,
                byte = byte[0],
                "ignoring unknown control message"
            );
            None
        }
        Err(error) => {
            debug!(target: DAEMON_TARGET, error = %error, "control connection read failed");
            None
        }
    }
}

fn acknowledge(mut stream: UnixStream) {
    if let Err(error) = stream.write_all(&[SHUTDOWN_SENTINEL]) {
        debug!(
            target: DAEMON_TARGET,
            error = %error,
            "requester left before acknowledgement"
        );
    }
}
