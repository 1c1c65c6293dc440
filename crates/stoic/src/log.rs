//! Logger capability handed to the supervision core.
//!
//! The runner never touches the global subscriber directly. It receives a set
//! of [`ChildLogger`] handles and emits leveled, pre-formatted messages
//! through them, which keeps the core testable with a recording logger.

use std::fmt;
use std::sync::Arc;

/// Target for events describing the supervised child and its output.
pub const CHILD_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::child");

/// Severity attached to a child-related log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Accepts leveled, formatted messages on behalf of the supervision core.
pub trait ChildLogger: Send + Sync {
    /// Records one message at the given severity.
    fn log(&self, severity: Severity, message: fmt::Arguments<'_>);
}

/// [`ChildLogger`] that forwards messages to `tracing` under [`CHILD_TARGET`].
#[derive(Debug, Clone)]
pub struct TracingLogger {
    name: String,
}

impl TracingLogger {
    /// Builds a logger reporting under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ChildLogger for TracingLogger {
    fn log(&self, severity: Severity, message: fmt::Arguments<'_>) {
        let logger = self.name.as_str();
        match severity {
            Severity::Info => {
                tracing::info!(target: CHILD_TARGET, logger, "{message}");
            }
            Severity::Warn => {
                tracing::warn!(target: CHILD_TARGET, logger, "{message}");
            }
            Severity::Error => {
                tracing::error!(target: CHILD_TARGET, logger, "{message}");
            }
        }
    }
}

/// The three named loggers used for one supervised service.
#[derive(Clone)]
pub struct RunnerLoggers {
    /// Lifecycle events: starting, restarting, exit codes.
    pub process: Arc<dyn ChildLogger>,
    /// Lines read from the child's standard output.
    pub stdout: Arc<dyn ChildLogger>,
    /// Lines read from the child's standard error.
    pub stderr: Arc<dyn ChildLogger>,
}

impl RunnerLoggers {
    /// Builds `tracing` loggers named `<service>-process`, `<service>-stdout`
    /// and `<service>-stderr`.
    #[must_use]
    pub fn for_service(service: &str) -> Self {
        Self {
            process: Arc::new(TracingLogger::new(format!("{service}-process"))),
            stdout: Arc::new(TracingLogger::new(format!("{service}-stdout"))),
            stderr: Arc::new(TracingLogger::new(format!("{service}-stderr"))),
        }
    }
}

impl fmt::Debug for RunnerLoggers {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("RunnerLoggers").finish_non_exhaustive()
    }
}
