//! Control plane: startup lock, control socket, daemonisation and the
//! single-byte shutdown protocol.
//!
//! A client connects to the control socket and writes one byte. `0x00`
//! requests shutdown; the daemon tears the service down, removes the socket
//! and replies with one byte before closing. Anything else is ignored.

use std::time::Duration;

mod client;
mod control;
mod daemonizer;
mod errors;
mod lock;
mod socket;

pub use client::{DaemonStatus, status, stop};
pub use control::{ControlPlan, LaunchMode, Service, StartOutcome, start};
pub use daemonizer::{DaemonizeError, Daemonizer, Detached, SystemDaemonizer};
pub use errors::{DaemonError, HookError, HookStage};
pub use socket::check_if_already_running;

pub(crate) use client::send_shutdown;

pub(crate) const DAEMON_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::daemon");
pub(crate) const FOREGROUND_ENV_VAR: &str = "STOIC_FOREGROUND";

/// Control message requesting shutdown; also used as the acknowledgement.
pub const SHUTDOWN_SENTINEL: u8 = 0x00;

/// Longest time an accepted connection may stay silent.
pub(crate) const CONTROL_READ_TIMEOUT: Duration = Duration::from_secs(5);
