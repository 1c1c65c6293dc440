//! The supervised child exposed to the control plane as a [`Service`].

use std::path::PathBuf;

use crate::daemon::{HookError, Service};
use crate::runner::Runner;
use crate::signals::SignalForwarder;

/// Starts the runner on setup and shuts it down on teardown.
#[derive(Debug)]
pub struct SupervisedService {
    runner: Runner,
    socket: PathBuf,
    forward_signals: bool,
    forwarder: Option<SignalForwarder>,
}

impl SupervisedService {
    /// Wraps `runner`; `socket` receives forwarded termination signals.
    #[must_use]
    pub fn new(runner: Runner, socket: PathBuf) -> Self {
        Self {
            runner,
            socket,
            forward_signals: true,
            forwarder: None,
        }
    }

    /// Enables or disables forwarding SIGTERM, SIGINT, SIGHUP and SIGQUIT.
    #[must_use]
    pub fn with_signal_forwarding(mut self, enabled: bool) -> Self {
        self.forward_signals = enabled;
        self
    }
}

impl Service for SupervisedService {
    fn setup(&mut self) -> Result<(), HookError> {
        if self.forward_signals {
            self.forwarder = Some(SignalForwarder::install(self.socket.clone())?);
        }
        self.runner.start()?;
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), HookError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.close();
        }
        self.runner.shutdown()?;
        Ok(())
    }
}
