//! Error types for the CLI runtime.

use std::io;

use thiserror::Error;

use stoic_config::{ConfigError, RuntimePathsError, SocketPreparationError};

use crate::daemon::DaemonError;
use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Paths(#[from] RuntimePathsError),
    #[error("failed to prepare control socket directory: {0}")]
    PrepareSocket(#[from] SocketPreparationError),
    #[error(
        "no child command configured; pass it after `--` or set `command` in the configuration file"
    )]
    MissingCommand,
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}
