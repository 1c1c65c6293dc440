//! Startup lock guarding the bind-or-detect-duplicate critical section.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, warn};

use super::DAEMON_TARGET;
use super::errors::DaemonError;

/// Exclusive advisory lock held while the control socket is bound.
///
/// The lock file records the holder's pid for operators; nothing reads it
/// back. Dropping the guard removes the file and releases the lock.
#[derive(Debug)]
pub(crate) struct StartupLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl StartupLock {
    /// Acquires the lock without blocking.
    ///
    /// Fails with [`DaemonError::StartupInProgress`] when another process
    /// holds it.
    pub(crate) fn acquire(path: &Path) -> Result<Self, DaemonError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)
            .map_err(|source| DaemonError::LockCreate {
                path: path.to_path_buf(),
                source,
            })?;
        let mut lock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(
            |(_, errno)| {
                if errno == Errno::EWOULDBLOCK {
                    DaemonError::StartupInProgress {
                        lock: path.to_path_buf(),
                    }
                } else {
                    DaemonError::LockAcquire {
                        path: path.to_path_buf(),
                        source: errno,
                    }
                }
            },
        )?;
        record_pid(&mut lock).map_err(|source| DaemonError::LockWrite {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            target: DAEMON_TARGET,
            file = %path.display(),
            "acquired startup lock"
        );
        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }
}

fn record_pid(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    write!(file, "{:5}", process::id())?;
    file.flush()
}

impl Drop for StartupLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    target: DAEMON_TARGET,
                    file = %self.path.display(),
                    error = %error,
                    "failed to remove startup lock"
                );
            }
            _ => {}
        }
    }
}
