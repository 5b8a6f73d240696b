//! `strata daemon` and its management subcommands.

use crate::cli::DaemonCommands;
use crate::shutdown::install_signal_handlers;
use std::time::Duration;
use strata_config::DaemonPaths;
use strata_daemon::{Connector, DaemonOptions, DaemonStatus, ServerConfig, read_pid, run_daemon};
use strata_paths::AbsolutePath;

/// Version clients and daemon must agree on.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolved context shared by every daemon command.
#[derive(Debug, Clone)]
pub struct DaemonContext {
    pub repo_root: AbsolutePath,
    pub paths: DaemonPaths,
    pub options: DaemonOptions,
}

impl DaemonContext {
    fn connector(&self) -> miette::Result<Connector> {
        let bin = std::env::current_exe()
            .map_err(|e| miette::miette!("Failed to locate the strata executable: {e}"))?;
        Ok(Connector::new(
            bin,
            self.repo_root.clone(),
            self.paths.clone(),
            VERSION,
            self.options.clone(),
        ))
    }
}

/// Apply `--idle-timeout`.
pub fn options_with_idle_timeout(idle_timeout: Option<u64>) -> DaemonOptions {
    let mut options = DaemonOptions::default();
    if let Some(secs) = idle_timeout {
        options.idle_timeout = Duration::from_secs(secs);
    }
    options
}

/// Run the daemon in this process until it is told to stop.
pub async fn run_foreground(ctx: DaemonContext) -> miette::Result<()> {
    let shutdown = install_signal_handlers();
    let config = ServerConfig {
        repo_root: ctx.repo_root,
        paths: ctx.paths,
        version: VERSION.to_string(),
        options: ctx.options,
    };
    run_daemon(config, shutdown).await?;
    Ok(())
}

/// Run one management subcommand and return what to print.
pub async fn execute(ctx: &DaemonContext, command: DaemonCommands) -> miette::Result<String> {
    let connector = ctx.connector()?;
    match command {
        DaemonCommands::Start => {
            connector.connect().await?;
            Ok(running_message(ctx))
        }
        DaemonCommands::Stop => {
            if connector.stop().await? {
                Ok("Daemon stopped".to_string())
            } else {
                Ok("Daemon is not running".to_string())
            }
        }
        DaemonCommands::Restart => {
            connector.stop().await?;
            connector.connect().await?;
            Ok(running_message(ctx))
        }
        DaemonCommands::Status { json } => {
            let status = connector.dont_start(true).connect().await?.status().await?;
            if json {
                serde_json::to_string_pretty(&status)
                    .map_err(|e| miette::miette!("Failed to serialize status: {e}"))
            } else {
                Ok(format_status(&status))
            }
        }
    }
}

fn running_message(ctx: &DaemonContext) -> String {
    match read_pid(ctx.paths.pid_file.as_path()) {
        Ok(Some(pid)) => format!("Daemon is running (pid {pid})"),
        _ => "Daemon is running".to_string(),
    }
}

fn format_status(status: &DaemonStatus) -> String {
    let uptime = Duration::from_millis(status.uptime_ms);
    format!(
        "Daemon is running\n  uptime:   {}s\n  log file: {}\n  pid file: {}\n  socket:   {}",
        uptime.as_secs(),
        status.log_file.display(),
        status.pid_file.display(),
        status.sock_file.display()
    )
}
