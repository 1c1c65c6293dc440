//! Structured telemetry initialisation for the supervisor.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Mutex;

use camino::Utf8PathBuf;
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};

use stoic_config::{Config, LogFormat};

static TELEMETRY_GUARD: OnceCell<Option<RawFd>> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle {
    log_file: Option<RawFd>,
}

impl TelemetryHandle {
    /// Descriptors the daemoniser must leave open for logging to keep working.
    #[must_use]
    pub fn preserved_fds(&self) -> Vec<RawFd> {
        self.log_file.into_iter().collect()
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to open the configured log file.
    #[error("failed to open log file '{path}': {source}")]
    LogFile {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Repeated calls are idempotent: the first invocation installs the global
/// subscriber and later ones return a handle describing that installation.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|log_file| TelemetryHandle {
            log_file: *log_file,
        })
}

fn install_subscriber(config: &Config) -> Result<Option<RawFd>, TelemetryError> {
    let filter = parse_filter(config.log_filter())?;
    match config.log_file() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| TelemetryError::LogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            let fd = file.as_raw_fd();
            install(filter, config.log_format(), Mutex::new(file), false)?;
            Ok(Some(fd))
        }
        None => {
            // Avoid stray colour codes in non-TTY sinks while keeping colour on
            // interactive terminals.
            let ansi = io::stderr().is_terminal();
            install(filter, config.log_format(), io::stderr, ansi)?;
            Ok(None)
        }
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directive).map_err(|error| TelemetryError::Filter(error.to_string()))
}

fn install<W>(
    filter: EnvFilter,
    format: LogFormat,
    writer: W,
    ansi: bool,
) -> Result<(), TelemetryError>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::level("info", true)]
    #[case::targeted("stoic::runner=debug,warn", true)]
    #[case::bad_level("stoic=verbose", false)]
    fn filter_directives_are_validated(#[case] directive: &str, #[case] valid: bool) {
        assert_eq!(parse_filter(directive).is_ok(), valid);
    }

    #[test]
    fn handle_without_log_file_preserves_nothing() {
        assert!(TelemetryHandle::default().preserved_fds().is_empty());
    }

    #[test]
    fn initialise_is_idempotent() {
        let config = Config::named("telemetry-test");
        let first = initialise(&config).expect("first initialisation");
        let second = initialise(&config).expect("second initialisation");
        assert_eq!(first.preserved_fds(), second.preserved_fds());
    }
}
