//! Single-process supervisor.
//!
//! `stoic start` binds a Unix control socket, detaches into the background
//! and keeps one child program running, restarting it with exponential
//! backoff and relaying its output into structured logs. `stoic stop` sends
//! the one-byte shutdown request over the control socket and waits for the
//! daemon to acknowledge once the child is gone.
//!
//! The modules can also be used directly: [`runner::Runner`] supervises a
//! child in-process and [`daemon::start`] drives any [`daemon::Service`].

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use stoic_config::{Config, RuntimePaths};

pub mod backoff;
mod cli;
pub mod daemon;
mod errors;
pub mod log;
pub mod relay;
pub mod runner;
pub mod service;
pub mod signals;
pub mod telemetry;

#[cfg(test)]
mod tests;

use cli::{Cli, CliCommand};
use daemon::{ControlPlan, DaemonStatus, LaunchMode, StartOutcome, SystemDaemonizer};
use errors::AppError;
use log::RunnerLoggers;
use runner::{ChildCommand, Runner};
use service::SupervisedService;

/// Parses `args`, executes the requested command and reports the outcome.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    match try_run(args, stdout) {
        Ok(code) => code,
        Err(AppError::CliUsage(error)) => {
            let rendered = error.render();
            let _ = if error.use_stderr() {
                write!(stderr, "{rendered}")
            } else {
                write!(stdout, "{rendered}")
            };
            ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(1))
        }
        Err(error) => {
            let _ = writeln!(stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}

fn try_run<I, W>(args: I, stdout: &mut W) -> Result<ExitCode, AppError>
where
    I: IntoIterator<Item = OsString>,
    W: Write,
{
    let cli = Cli::try_parse_from(args).map_err(AppError::CliUsage)?;
    let config = Config::load(cli.config.as_deref(), cli.overrides())?;
    let paths = RuntimePaths::from_config(&config)?;
    match &cli.command {
        CliCommand::Start(start) => {
            start_supervisor(&config, paths, LaunchMode::detect(start.foreground), stdout)
        }
        CliCommand::Stop => {
            daemon::stop(paths.socket_path())?;
            writeln!(stdout, "stopped {}", paths.socket_path().display())?;
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Status => {
            let status = daemon::status(paths.socket_path())?;
            writeln!(stdout, "{}", status.as_str())?;
            Ok(match status {
                DaemonStatus::Running => ExitCode::SUCCESS,
                DaemonStatus::Stale | DaemonStatus::NotRunning => ExitCode::FAILURE,
            })
        }
    }
}

fn start_supervisor<W: Write>(
    config: &Config,
    paths: RuntimePaths,
    mode: LaunchMode,
    stdout: &mut W,
) -> Result<ExitCode, AppError> {
    let mut command =
        ChildCommand::new(config.command.clone()).map_err(|_| AppError::MissingCommand)?;
    if let Some(executable) = &config.executable {
        command = command.with_executable(executable.clone());
    }
    config.socket().absolute()?.prepare_filesystem()?;
    let telemetry = telemetry::initialise(config)?;

    let backoff =
        Duration::try_from_secs_f64(config.default_backoff_seconds).unwrap_or(Duration::MAX);
    let runner = Runner::new(command, RunnerLoggers::for_service(&config.name), backoff);
    let socket = paths.socket_path().to_path_buf();
    let mut service = SupervisedService::new(runner, socket.clone());
    let plan = ControlPlan {
        paths,
        mode,
        daemonizer: SystemDaemonizer::new(),
        preserved_fds: telemetry.preserved_fds(),
    };

    match daemon::start(plan, &mut service)? {
        StartOutcome::Detached => {
            writeln!(stdout, "unix://{}", socket.display())?;
        }
        StartOutcome::Stopped => {}
    }
    Ok(ExitCode::SUCCESS)
}
