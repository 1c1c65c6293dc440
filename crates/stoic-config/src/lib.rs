//! Shared configuration for the `stoic` supervisor.
//!
//! A service is described by a TOML file plus command-line overrides. The
//! file is optional; every key falls back to a built-in default except the
//! child command, which only `start` requires.
//!
//! ```toml
//! name = "web"
//! command = ["python", "-m", "http.server"]
//! default_backoff_seconds = 1.0
//! log_format = "compact"
//! ```

mod defaults;
mod logging;
mod runtime;
mod socket;

use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

pub use defaults::{
    DEFAULT_BACKOFF_SECONDS, DEFAULT_LOG_FILTER, LOCK_SUFFIX, default_log_filter_string,
    default_log_format, default_socket_path,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use socket::{SocketPath, SocketPreparationError};

/// Service name used when neither the file nor the CLI provides one.
pub const DEFAULT_NAME: &str = "stoic";

/// Resolved supervisor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Service name; prefixes the logger names and the default socket file.
    pub name: String,
    /// Control socket location.
    pub socket: SocketPath,
    /// Explicit startup lock path; defaults to the socket path plus `.lock`.
    pub startup_lock: Option<Utf8PathBuf>,
    /// Child argument vector. The first element is argv\[0\].
    pub command: Vec<String>,
    /// Program image to execute instead of resolving `command[0]`.
    pub executable: Option<Utf8PathBuf>,
    /// Initial restart backoff window in seconds.
    pub default_backoff_seconds: f64,
    /// `tracing` filter directive.
    pub log_filter: String,
    /// Output format for the supervisor's own log stream.
    pub log_format: LogFormat,
    /// File receiving the log stream instead of stderr.
    pub log_file: Option<Utf8PathBuf>,
}

/// Values supplied on the command line. Each present value wins over the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub name: Option<String>,
    pub socket: Option<SocketPath>,
    pub startup_lock: Option<Utf8PathBuf>,
    pub command: Option<Vec<String>>,
    pub executable: Option<Utf8PathBuf>,
    pub default_backoff_seconds: Option<f64>,
    pub log_filter: Option<String>,
    pub log_format: Option<LogFormat>,
    pub log_file: Option<Utf8PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    name: Option<String>,
    socket: Option<SocketPath>,
    startup_lock: Option<Utf8PathBuf>,
    #[serde(default)]
    command: Vec<String>,
    executable: Option<Utf8PathBuf>,
    default_backoff_seconds: Option<f64>,
    log_filter: Option<String>,
    log_format: Option<LogFormat>,
    log_file: Option<Utf8PathBuf>,
}

impl FileConfig {
    fn apply(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            name,
            socket,
            startup_lock,
            command,
            executable,
            default_backoff_seconds,
            log_filter,
            log_format,
            log_file,
        } = overrides;
        self.name = name.or(self.name.take());
        self.socket = socket.or(self.socket.take());
        self.startup_lock = startup_lock.or(self.startup_lock.take());
        if let Some(command) = command.filter(|command| !command.is_empty()) {
            self.command = command;
        }
        self.executable = executable.or(self.executable.take());
        self.default_backoff_seconds = default_backoff_seconds.or(self.default_backoff_seconds);
        self.log_filter = log_filter.or(self.log_filter.take());
        self.log_format = log_format.or(self.log_format);
        self.log_file = log_file.or(self.log_file.take());
    }

    fn resolve(self) -> Result<Config, ConfigError> {
        let name = self.name.unwrap_or_else(|| DEFAULT_NAME.to_owned());
        if name.trim().is_empty() {
            return Err(ConfigError::MissingName);
        }
        let backoff = self
            .default_backoff_seconds
            .unwrap_or_else(defaults::default_backoff_seconds);
        if !backoff.is_finite() || backoff <= 0.0 {
            return Err(ConfigError::InvalidBackoff { value: backoff });
        }
        Ok(Config {
            socket: self
                .socket
                .unwrap_or_else(|| default_socket_path(&name)),
            name,
            startup_lock: self.startup_lock,
            command: self.command,
            executable: self.executable,
            default_backoff_seconds: backoff,
            log_filter: self.log_filter.unwrap_or_else(default_log_filter_string),
            log_format: self.log_format.unwrap_or_else(default_log_format),
            log_file: self.log_file,
        })
    }
}

impl Config {
    /// Builds the default configuration for the named service.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            socket: default_socket_path(name),
            startup_lock: None,
            command: Vec::new(),
            executable: None,
            default_backoff_seconds: DEFAULT_BACKOFF_SECONDS,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            log_file: None,
        }
    }

    /// Parses a TOML document without applying overrides.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        parse_file(content, None)?.resolve()
    }

    /// Loads the optional configuration file and layers the overrides on top.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut file = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                parse_file(&content, Some(path))?
            }
            None => FileConfig::default(),
        };
        file.apply(overrides);
        file.resolve()
    }

    /// Control socket location.
    #[must_use]
    pub fn socket(&self) -> &SocketPath {
        &self.socket
    }

    /// Explicit startup lock path, if configured.
    #[must_use]
    pub fn startup_lock(&self) -> Option<&Utf8Path> {
        self.startup_lock.as_deref()
    }

    /// Configured log filter directive.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Configured log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Configured log file, if logs should not go to stderr.
    #[must_use]
    pub fn log_file(&self) -> Option<&Utf8Path> {
        self.log_file.as_deref()
    }
}

fn parse_file(content: &str, path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.map(Path::to_path_buf),
        source,
    })
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML for this schema.
    #[error("invalid configuration{}: {source}", describe_path(.path.as_deref()))]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: toml::de::Error,
    },
    /// The service name resolved to an empty string.
    #[error("service name must not be empty")]
    MissingName,
    /// The backoff window is not a positive number of seconds.
    #[error("default_backoff_seconds must be a positive number, got {value}")]
    InvalidBackoff { value: f64 },
}

fn describe_path(path: Option<&Path>) -> String {
    path.map(|path| format!(" in '{}'", path.display()))
        .unwrap_or_default()
}
