//! Helpers shared by the behavioural suites.

use std::thread;
use std::time::{Duration, Instant};

use crate::runner::ChildCommand;

pub(crate) const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) type StepResult = Result<(), String>;

/// Polls `condition` until it holds or [`WAIT_TIMEOUT`] passes.
pub(crate) fn wait_for(what: &str, mut condition: impl FnMut() -> bool) -> StepResult {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }
    Err(format!("timed out waiting for {what}"))
}

/// `/bin/sh -c <script> stoic-test <args...>`.
pub(crate) fn shell(script: &str, args: &[&str]) -> ChildCommand {
    let mut argv = vec![
        "/bin/sh".to_owned(),
        "-c".to_owned(),
        script.to_owned(),
        "stoic-test".to_owned(),
    ];
    argv.extend(args.iter().map(|arg| (*arg).to_owned()));
    match ChildCommand::new(argv) {
        Ok(command) => command,
        Err(error) => panic!("shell command should be valid: {error}"),
    }
}
