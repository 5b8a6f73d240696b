use crate::logging::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(about = "Content-addressed task caching for monorepos")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Repository root (defaults to the current directory)")]
    pub cwd: Option<PathBuf>,

    #[arg(short = 'l', long, global = true, help = "Set logging level", value_enum)]
    pub level: Option<LogLevel>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Run the repository daemon in the foreground, or manage it")]
    Daemon {
        #[command(subcommand)]
        command: Option<DaemonCommands>,

        #[arg(long, help = "Exit after this many seconds without requests (0 disables)")]
        idle_timeout: Option<u64>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonCommands {
    #[command(about = "Start the daemon if it is not running")]
    Start,
    #[command(about = "Stop the daemon")]
    Stop,
    #[command(about = "Stop the daemon and start a new one")]
    Restart,
    #[command(about = "Show daemon uptime and file locations")]
    Status {
        #[arg(long, help = "Print JSON")]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_daemon_runs_in_foreground() {
        let cli = Cli::try_parse_from(["strata", "daemon"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Daemon {
                command: None,
                idle_timeout: None
            }
        ));
    }

    #[test]
    fn test_status_json() {
        let cli = Cli::try_parse_from(["strata", "daemon", "status", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Daemon {
                command: Some(DaemonCommands::Status { json: true }),
                ..
            }
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["strata", "daemon", "stop", "--cwd", "/repo", "-l", "debug"])
                .unwrap();
        assert_eq!(cli.cwd, Some(PathBuf::from("/repo")));
        assert_eq!(cli.level, Some(LogLevel::Debug));
    }

    #[test]
    fn test_spawned_daemon_arguments_parse() {
        // Matches what the connector passes when it starts a daemon
        let cli = Cli::try_parse_from(["strata", "daemon", "--idle-timeout", "90"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Daemon {
                command: None,
                idle_timeout: Some(90)
            }
        ));
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["strata", "daemon", "explode"]).is_err());
    }
}
