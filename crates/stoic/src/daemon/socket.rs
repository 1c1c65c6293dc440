//! Control socket binding, duplicate detection and cleanup.

use std::fs;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::time::Duration;

use socket2::{Domain, SockAddr, Socket, Type};
use tracing::{info, warn};

use stoic_config::RuntimePaths;

use super::DAEMON_TARGET;
use super::errors::DaemonError;
use super::lock::StartupLock;

const SOCKET_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const LISTEN_BACKLOG: i32 = 1;

/// Fails with [`DaemonError::AlreadyRunning`] when a live listener owns `socket`.
///
/// A refused connection means the file is left over from a dead instance and
/// is reported as `Ok(())` so the caller may remove it and bind again.
pub fn check_if_already_running(socket: &Path) -> Result<(), DaemonError> {
    match probe(socket) {
        Ok(()) => Err(DaemonError::AlreadyRunning {
            socket: socket.to_path_buf(),
        }),
        Err(error) if error.kind() == io::ErrorKind::ConnectionRefused => Ok(()),
        Err(source) => Err(DaemonError::Probe {
            path: socket.to_path_buf(),
            source,
        }),
    }
}

/// Connects to `socket` as a client and immediately hangs up.
pub(crate) fn probe(socket: &Path) -> io::Result<()> {
    let client = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(socket)?;
    client.connect_timeout(&address, SOCKET_PROBE_TIMEOUT)
}

/// Binds and listens on the control socket while holding the startup lock.
///
/// An address already in use is probed: a live owner yields
/// [`DaemonError::AlreadyRunning`]; a stale file is removed and the bind is
/// retried exactly once.
pub(crate) fn bind_control_socket(paths: &RuntimePaths) -> Result<UnixListener, DaemonError> {
    let path = paths.socket_path();
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)
        .map_err(|source| DaemonError::CreateSocket { source })?;
    let address = SockAddr::unix(path).map_err(|source| DaemonError::Bind {
        path: path.to_path_buf(),
        source,
    })?;

    let lock = StartupLock::acquire(paths.lock_path())?;
    match socket.bind(&address) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::AddrInUse => {
            check_if_already_running(path)?;
            warn!(
                target: DAEMON_TARGET,
                socket = %path.display(),
                "removing stale control socket"
            );
            fs::remove_file(path).map_err(|source| DaemonError::RemoveStale {
                path: path.to_path_buf(),
                source,
            })?;
            socket
                .bind(&address)
                .map_err(|source| DaemonError::Rebind {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        Err(source) => {
            return Err(DaemonError::Bind {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    if let Err(source) = socket.listen(LISTEN_BACKLOG) {
        remove_socket_file(path);
        return Err(DaemonError::Listen {
            path: path.to_path_buf(),
            source,
        });
    }
    drop(lock);

    info!(
        target: DAEMON_TARGET,
        socket = %path.display(),
        "control socket bound"
    );
    Ok(UnixListener::from(OwnedFd::from(socket)))
}

/// Removes the socket file, logging anything other than a missing file.
pub(crate) fn remove_socket_file(path: &Path) {
    if let Err(error) = fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: DAEMON_TARGET,
            error = %error,
            socket = %path.display(),
            "failed to remove control socket file"
        );
    }
}
