use std::env;
use std::fmt;
use std::fs::DirBuilder;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Filesystem location of a service's Unix-domain control socket.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SocketPath {
    path: Utf8PathBuf,
}

impl SocketPath {
    /// Wraps the provided path.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Borrows the underlying path.
    #[must_use]
    pub fn as_path(&self) -> &Utf8Path {
        self.path.as_path()
    }

    /// Resolves a relative socket path against the current working directory.
    ///
    /// The daemon changes directory to `/` once detached, so both the socket
    /// and the lock path must be absolute before daemonisation begins.
    pub fn absolute(&self) -> Result<Self, SocketPreparationError> {
        if self.path.is_absolute() {
            return Ok(self.clone());
        }
        let cwd = env::current_dir()
            .map_err(|source| SocketPreparationError::CurrentDirectory { source })?;
        let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(|path| {
            SocketPreparationError::NonUtf8Directory {
                path: path.display().to_string(),
            }
        })?;
        Ok(Self::new(cwd.join(&self.path)))
    }

    /// Ensures the socket's parent directory exists with restrictive permissions.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(parent) = self
            .path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
        else {
            return Err(SocketPreparationError::MissingParent {
                path: self.path.clone(),
            });
        };

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        if let Err(source) = builder.create(parent.as_std_path())
            && source.kind() != io::ErrorKind::AlreadyExists
        {
            return Err(SocketPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            });
        }

        Ok(())
    }
}

impl fmt::Display for SocketPath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "unix://{}", self.path)
    }
}

impl From<&str> for SocketPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Errors raised when preparing socket paths and directories.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// Parent directory is missing when creating a Unix socket path.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent { path: Utf8PathBuf },
    /// Failed to create or adjust socket directories.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// The working directory could not be read while resolving a relative path.
    #[error("failed to read current directory: {source}")]
    CurrentDirectory {
        #[source]
        source: io::Error,
    },
    /// The working directory is not valid UTF-8.
    #[error("current directory '{path}' is not valid UTF-8")]
    NonUtf8Directory { path: String },
}
