//! Client-side helpers used by `stoic stop` and `stoic status`.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use super::errors::DaemonError;
use super::socket::probe;
use super::SHUTDOWN_SENTINEL;

/// Observed state of a daemon's control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    /// A listener accepted the probe connection.
    Running,
    /// The socket file exists but nothing is listening.
    Stale,
    /// No socket file exists.
    NotRunning,
}

impl DaemonStatus {
    /// Human-readable label printed by the CLI.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stale => "not running (stale socket)",
            Self::NotRunning => "not running",
        }
    }
}

/// Requests shutdown and waits for the daemon's one-byte acknowledgement.
///
/// The daemon acknowledges only after its teardown has finished, so a
/// successful return means the child has exited and the socket is gone.
pub fn stop(socket: &Path) -> Result<(), DaemonError> {
    let mut stream = send_shutdown(socket)?;
    let mut ack = [0_u8; 1];
    match stream.read(&mut ack) {
        Ok(_) => Ok(()),
        Err(source) => Err(DaemonError::Acknowledge {
            path: socket.to_path_buf(),
            source,
        }),
    }
}

/// Sends the shutdown sentinel without waiting for the acknowledgement.
pub(crate) fn send_shutdown(socket: &Path) -> Result<UnixStream, DaemonError> {
    let mut stream = UnixStream::connect(socket).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            DaemonError::NotRunning {
                socket: socket.to_path_buf(),
            }
        } else {
            DaemonError::Connect {
                path: socket.to_path_buf(),
                source,
            }
        }
    })?;
    stream
        .write_all(&[SHUTDOWN_SENTINEL])
        .map_err(|source| DaemonError::Send {
            path: socket.to_path_buf(),
            source,
        })?;
    Ok(stream)
}

/// Probes the control socket without disturbing the daemon.
pub fn status(socket: &Path) -> Result<DaemonStatus, DaemonError> {
    match probe(socket) {
        Ok(()) => Ok(DaemonStatus::Running),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(DaemonStatus::NotRunning),
        Err(error) if error.kind() == io::ErrorKind::ConnectionRefused => Ok(DaemonStatus::Stale),
        Err(source) => Err(DaemonError::Probe {
            path: socket.to_path_buf(),
            source,
        }),
    }
}
