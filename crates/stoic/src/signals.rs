//! Translates termination signals into control-socket shutdown requests.
//!
//! Delivering the request over the socket means `kill <daemon>` goes through
//! exactly the same teardown path as `stoic stop`.

use std::io;
use std::path::{Path, PathBuf};
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::{info, warn};

use crate::daemon::send_shutdown;

pub(crate) const SIGNALS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::signals");

const FORWARDED_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Background thread forwarding termination signals to the control socket.
#[derive(Debug)]
pub struct SignalForwarder {
    handle: Handle,
    thread: Option<thread::JoinHandle<()>>,
}

impl SignalForwarder {
    /// Registers the handlers and starts forwarding to `socket`.
    pub fn install(socket: PathBuf) -> io::Result<Self> {
        let mut signals = Signals::new(FORWARDED_SIGNALS)?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name(concat!(env!("CARGO_PKG_NAME"), "-signals").to_owned())
            .spawn(move || forward(&mut signals, &socket))?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Stops forwarding and waits for the thread to finish.
    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: SIGNALS_TARGET, "signal forwarding thread panicked");
        }
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward(signals: &mut Signals, socket: &Path) {
    for signal in signals.forever() {
        info!(
            target: SIGNALS_TARGET,
            signal,
            "termination signal received; requesting shutdown"
        );
        if let Err(error) = send_shutdown(socket) {
            warn!(
                target: SIGNALS_TARGET,
                error = %error,
                "failed to forward shutdown request"
            );
        }
    }
}
