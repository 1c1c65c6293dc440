//! Binary entrypoint for the `stoic` supervisor.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Unlocked handles: supervision threads log to stderr while `run` blocks.
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    stoic::run(std::env::args_os(), &mut stdout, &mut stderr)
}
