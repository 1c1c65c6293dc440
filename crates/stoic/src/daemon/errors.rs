//! Error surface for the control socket, startup lock and daemonisation.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use super::daemonizer::DaemonizeError;

/// Error reported by a [`Service`](super::Service) lifecycle hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Lifecycle hook that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Setup,
    Teardown,
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(match self {
            Self::Setup => "setup",
            Self::Teardown => "teardown",
        })
    }
}

/// Errors surfaced while starting, running or contacting the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A live instance already accepts connections on the control socket.
    #[error("daemon already running on '{}'", .socket.display())]
    AlreadyRunning {
        /// Control socket owned by the running instance.
        socket: PathBuf,
    },
    /// No control socket exists, so there is nothing to stop.
    #[error("daemon not running: no control socket at '{}'", .socket.display())]
    NotRunning {
        /// Control socket that was expected.
        socket: PathBuf,
    },
    /// Another `start` currently holds the startup lock.
    #[error("daemon start already in progress (lock: '{}')", .lock.display())]
    StartupInProgress {
        /// Lock file guarding the active start.
        lock: PathBuf,
    },
    /// The lock file could not be opened.
    #[error("failed to open startup lock '{}': {source}", .path.display())]
    LockCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Locking failed for a reason other than contention.
    #[error("failed to lock '{}': {source}", .path.display())]
    LockAcquire {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    /// Recording the holder's pid in the lock file failed.
    #[error("failed to write startup lock '{}': {source}", .path.display())]
    LockWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Creating the unbound control socket failed.
    #[error("failed to create control socket: {source}")]
    CreateSocket {
        #[source]
        source: io::Error,
    },
    /// Binding the control socket failed.
    #[error("failed to bind control socket '{}': {source}", .path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Binding again after removing a stale socket file failed.
    #[error("failed to rebind control socket '{}' after removing stale file: {source}", .path.display())]
    Rebind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Probing an existing socket failed for an unexpected reason.
    #[error("failed to probe control socket '{}': {source}", .path.display())]
    Probe {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A stale socket file could not be removed.
    #[error("failed to remove stale control socket '{}': {source}", .path.display())]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Switching the bound socket to listening mode failed.
    #[error("failed to listen on control socket '{}': {source}", .path.display())]
    Listen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Connecting to the control socket as a client failed.
    #[error("failed to connect to control socket '{}': {source}", .path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Sending the shutdown request failed.
    #[error("failed to send shutdown request to '{}': {source}", .path.display())]
    Send {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Waiting for the shutdown acknowledgement failed.
    #[error("failed to read shutdown acknowledgement from '{}': {source}", .path.display())]
    Acknowledge {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Detaching into the background failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        #[from]
        source: DaemonizeError,
    },
    /// A service lifecycle hook failed.
    #[error("service {stage} failed: {source}")]
    Hook {
        stage: HookStage,
        #[source]
        source: HookError,
    },
}
