//! Command-line argument definitions for the `stoic` binary.

use std::path::PathBuf;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

use stoic_config::{ConfigOverrides, LogFormat, SocketPath};

/// Runs one program under supervision with restart backoff.
#[derive(Parser, Debug)]
#[command(name = "stoic", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// TOML configuration file describing the service.
    #[arg(long, global = true, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,
    /// Service name used for logger names and the default socket.
    #[arg(long, global = true)]
    pub(crate) name: Option<String>,
    /// Control socket path.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) socket: Option<Utf8PathBuf>,
    /// Startup lock path (defaults to the socket path plus `.lock`).
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) lock_file: Option<Utf8PathBuf>,
    /// `tracing` filter directive, for example `info` or `stoic=debug`.
    #[arg(long, global = true, value_name = "FILTER")]
    pub(crate) log_filter: Option<String>,
    /// Log output format.
    #[arg(long, global = true, value_name = "FORMAT")]
    pub(crate) log_format: Option<LogFormat>,
    /// Append logs to this file instead of stderr.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) log_file: Option<Utf8PathBuf>,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Supervisor lifecycle commands.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Starts the supervisor and its child.
    Start(StartArgs),
    /// Asks a running supervisor to shut down and waits for it.
    Stop,
    /// Reports whether a supervisor is listening on the control socket.
    Status,
}

/// Options specific to `start`.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct StartArgs {
    /// Stay attached to the terminal instead of daemonising.
    #[arg(long)]
    pub(crate) foreground: bool,
    /// Program image to execute; the first command argument becomes argv[0].
    #[arg(long, value_name = "PATH")]
    pub(crate) executable: Option<Utf8PathBuf>,
    /// Initial restart backoff window in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub(crate) backoff: Option<f64>,
    /// Child command and arguments, given after `--`.
    #[arg(last = true, value_name = "ARGV")]
    pub(crate) argv: Vec<String>,
}

impl Cli {
    /// Converts the parsed flags into configuration overrides.
    pub(crate) fn overrides(&self) -> ConfigOverrides {
        let start = match &self.command {
            CliCommand::Start(start) => Some(start),
            CliCommand::Stop | CliCommand::Status => None,
        };
        ConfigOverrides {
            name: self.name.clone(),
            socket: self.socket.clone().map(SocketPath::new),
            startup_lock: self.lock_file.clone(),
            command: start
                .map(|start| start.argv.clone())
                .filter(|argv| !argv.is_empty()),
            executable: start.and_then(|start| start.executable.clone()),
            default_backoff_seconds: start.and_then(|start| start.backoff),
            log_filter: self.log_filter.clone(),
            log_format: self.log_format,
            log_file: self.log_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("arguments should parse")
    }

    #[test]
    fn start_collects_child_argv_after_separator() {
        let cli = parse(&[
            "stoic",
            "--name",
            "web",
            "start",
            "--foreground",
            "--backoff",
            "0.5",
            "--",
            "python",
            "-m",
            "http.server",
        ]);
        let CliCommand::Start(start) = &cli.command else {
            panic!("expected start command");
        };
        assert!(start.foreground);
        assert_eq!(start.argv, vec!["python", "-m", "http.server"]);

        let overrides = cli.overrides();
        assert_eq!(overrides.name.as_deref(), Some("web"));
        assert_eq!(overrides.default_backoff_seconds, Some(0.5));
        assert_eq!(
            overrides.command,
            Some(vec![
                "python".to_owned(),
                "-m".to_owned(),
                "http.server".to_owned()
            ])
        );
    }

    #[test]
    fn global_flags_are_accepted_after_subcommand() {
        let cli = parse(&["stoic", "stop", "--socket", "/tmp/web.sock"]);
        assert!(matches!(cli.command, CliCommand::Stop));
        assert_eq!(
            cli.overrides().socket,
            Some(SocketPath::new("/tmp/web.sock"))
        );
    }

    #[rstest]
    #[case::json("json", LogFormat::Json)]
    #[case::compact("compact", LogFormat::Compact)]
    fn log_format_flag_parses(#[case] value: &str, #[case] expected: LogFormat) {
        let cli = parse(&["stoic", "--log-format", value, "status"]);
        assert_eq!(cli.overrides().log_format, Some(expected));
    }

    #[test]
    fn start_without_argv_leaves_command_to_file() {
        let cli = parse(&["stoic", "start"]);
        assert_eq!(cli.overrides().command, None);
    }

    #[test]
    fn missing_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["stoic"]).is_err());
    }
}
