//! `strata` command line entry point.

mod cli;
mod commands;
mod logging;
mod shutdown;

use crate::cli::{Cli, Commands};
use crate::commands::{DaemonContext, execute, options_with_idle_timeout, run_foreground};
use crate::logging::{LogTarget, init_tracing};
use clap::Parser;
use strata_paths::AbsolutePath;
use tracing::Level;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let repo_root = resolve_repo_root(cli.cwd.as_deref())?;
    let paths = strata_config::daemon_paths(&repo_root)?;

    match cli.command {
        Commands::Daemon {
            command,
            idle_timeout,
        } => {
            let ctx = DaemonContext {
                repo_root,
                paths,
                options: options_with_idle_timeout(idle_timeout),
            };
            match command {
                None => {
                    let level = cli.level.map_or(Level::INFO, Level::from);
                    init_tracing(level, LogTarget::File(ctx.paths.log_file.as_path()))?;
                    run_foreground(ctx).await
                }
                Some(command) => {
                    let level = cli.level.map_or(Level::WARN, Level::from);
                    init_tracing(level, LogTarget::Stderr)?;
                    let output = execute(&ctx, command).await?;
                    print(&output);
                    Ok(())
                }
            }
        }
    }
}

fn resolve_repo_root(cwd: Option<&std::path::Path>) -> miette::Result<AbsolutePath> {
    let dir = match cwd {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()
            .map_err(|e| miette::miette!("Failed to read the current directory: {e}"))?,
    };
    let canonical = std::fs::canonicalize(&dir)
        .map_err(|e| miette::miette!("Cannot use {} as the repository root: {e}", dir.display()))?;
    Ok(AbsolutePath::new(canonical)?)
}

#[allow(clippy::print_stdout)]
fn print(output: &str) {
    println!("{output}");
}
