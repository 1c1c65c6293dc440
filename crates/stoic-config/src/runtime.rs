//! Derives the runtime artefact paths shared by the CLI and the daemon.
//!
//! `start` binds the control socket and holds the startup lock while binding;
//! `stop` and `status` only need the socket. Both sides resolve the same
//! absolute paths from [`Config`] so lifecycle commands agree on the layout.

use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::defaults::LOCK_SUFFIX;
use crate::{Config, SocketPath, SocketPreparationError};

/// Canonical paths for runtime artefacts owned by a supervised service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    socket_path: PathBuf,
    lock_path: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths from the shared configuration.
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        let socket = config.socket().absolute()?;
        let lock = match config.startup_lock() {
            Some(lock) => SocketPath::new(lock.to_owned()).absolute()?,
            None => SocketPath::new(lock_beside(&socket)),
        };
        Ok(Self {
            socket_path: socket.as_path().as_std_path().to_path_buf(),
            lock_path: lock.as_path().as_std_path().to_path_buf(),
        })
    }

    /// Path of the control socket.
    pub fn socket_path(&self) -> &Path {
        self.socket_path.as_path()
    }

    /// Path of the lock file guarding the bind-or-detect-duplicate phase.
    pub fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }
}

fn lock_beside(socket: &SocketPath) -> Utf8PathBuf {
    let mut path = socket.as_path().as_str().to_owned();
    path.push_str(LOCK_SUFFIX);
    Utf8PathBuf::from(path)
}

/// Errors raised while deriving runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// A configured path could not be made absolute.
    #[error("failed to resolve runtime path: {source}")]
    Resolve {
        #[from]
        source: SocketPreparationError,
    },
}
