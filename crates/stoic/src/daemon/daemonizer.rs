//! Double-fork daemonisation backend.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::fd::{IntoRawFd, RawFd};

use nix::errno::Errno;
use nix::sys::resource::{Resource, getrlimit};
use nix::sys::stat::{Mode, umask};
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, chdir, close, dup2, fork, setsid};
use thiserror::Error;
use tracing::info;

use super::DAEMON_TARGET;

const FALLBACK_FD_LIMIT: libc::rlim_t = 4096;

/// Which side of the detachment the caller is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// The invoking process; it should report success and return.
    Parent,
    /// The detached daemon; it should go on to serve the control socket.
    Daemon,
}

/// Abstraction over daemonisation strategies.
pub trait Daemonizer: Send + Sync {
    /// Detaches into the background, keeping `keep_fds` open in the daemon.
    fn daemonize(&self, keep_fds: &[RawFd]) -> Result<Detached, DaemonizeError>;
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    #[error("fork failed: {source}")]
    Fork {
        #[source]
        source: Errno,
    },
    #[error("failed to start a new session: {source}")]
    Session {
        #[source]
        source: Errno,
    },
    #[error("failed to open the null device: {source}")]
    NullDevice {
        #[source]
        source: io::Error,
    },
    #[error("failed to redirect standard stream {fd}: {source}")]
    Redirect {
        fd: RawFd,
        #[source]
        source: Errno,
    },
    #[error("failed to change directory to '/': {source}")]
    WorkingDirectory {
        #[source]
        source: Errno,
    },
}

/// Daemoniser built on the classic double fork.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    pub fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, keep_fds: &[RawFd]) -> Result<Detached, DaemonizeError> {
        info!(
            target: DAEMON_TARGET,
            preserved = ?keep_fds,
            "daemonising into background"
        );

        // SAFETY: the process is still single-threaded here; the supervisor
        // only spawns threads after detaching.
        match unsafe { fork() }.map_err(|source| DaemonizeError::Fork { source })? {
            ForkResult::Parent { child } => {
                // The intermediate process exits straight after its own fork.
                let _ = waitpid(child, None);
                return Ok(Detached::Parent);
            }
            ForkResult::Child => {}
        }

        setsid().map_err(|source| DaemonizeError::Session { source })?;

        // SAFETY: as above; the session leader only forks and exits.
        match unsafe { fork() }.map_err(|source| DaemonizeError::Fork { source })? {
            // SAFETY: `_exit` skips atexit handlers and stdio flushing, which
            // belong to the invoking process.
            ForkResult::Parent { .. } => unsafe { libc::_exit(0) },
            ForkResult::Child => {}
        }

        close_inherited_descriptors(keep_fds);
        redirect_standard_streams()?;
        umask(Mode::S_IWGRP | Mode::S_IRWXO);
        chdir("/").map_err(|source| DaemonizeError::WorkingDirectory { source })?;
        Ok(Detached::Daemon)
    }
}

/// Closes every descriptor above stderr that is not listed in `keep`.
///
/// Failures are ignored per descriptor; in the fallback sweep most numbers
/// are not open at all.
fn close_inherited_descriptors(keep: &[RawFd]) {
    let candidates = open_descriptors().unwrap_or_else(|| (0..descriptor_limit()).collect());
    for fd in closable_descriptors(candidates, keep) {
        let _ = close(fd);
    }
}

/// Lists open descriptors when `/proc/self/fd` is available.
fn open_descriptors() -> Option<Vec<RawFd>> {
    let entries = fs::read_dir("/proc/self/fd").ok()?;
    Some(
        entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .collect(),
    )
}

/// Soft `RLIMIT_NOFILE`, or a fallback when it is unknown or unlimited.
fn descriptor_limit() -> RawFd {
    let soft = getrlimit(Resource::RLIMIT_NOFILE)
        .map(|(soft, _)| soft)
        .unwrap_or(FALLBACK_FD_LIMIT);
    let soft = if soft == libc::RLIM_INFINITY {
        FALLBACK_FD_LIMIT
    } else {
        soft
    };
    RawFd::try_from(soft).unwrap_or(RawFd::MAX)
}

fn closable_descriptors<I>(candidates: I, keep: &[RawFd]) -> impl Iterator<Item = RawFd>
where
    I: IntoIterator<Item = RawFd>,
{
    candidates
        .into_iter()
        .filter(move |fd| *fd > 2 && !keep.contains(fd))
}

fn redirect_standard_streams() -> Result<(), DaemonizeError> {
    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|source| DaemonizeError::NullDevice { source })?;
    let null = null.into_raw_fd();
    for fd in 0..=2 {
        dup2(null, fd).map_err(|source| DaemonizeError::Redirect { fd, source })?;
    }
    if null > 2 {
        let _ = close(null);
    }
    Ok(())
}
