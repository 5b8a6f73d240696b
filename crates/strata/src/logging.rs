//! Tracing setup for the strata binary.
//!
//! Client commands log to stderr and stay quiet by default. The daemon runs
//! detached, so it logs to its own file instead.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Environment variable holding a full filter directive, e.g. `strata_daemon=debug`.
pub const LOG_ENV: &str = "STRATA_LOG";

/// Crates whose events pass the default filter.
const CRATES: &[&str] = &[
    "strata",
    "strata_daemon",
    "strata_filewatch",
    "strata_cache",
    "strata_hash",
    "strata_config",
    "strata_paths",
];

/// Log level options for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Show all logs (trace level)
    Trace,
    /// Show debug and above
    Debug,
    /// Show info and above
    Info,
    /// Show warnings and above
    Warn,
    /// Show errors only
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Where log lines go.
#[derive(Debug, Clone, Copy)]
pub enum LogTarget<'a> {
    /// Standard error, for interactive commands
    Stderr,
    /// Append to a file, for the daemon
    File(&'a Path),
}

static SESSION_ID: OnceLock<Uuid> = OnceLock::new();

/// Identifier attached to the first log line of this process.
pub fn session_id() -> Uuid {
    *SESSION_ID.get_or_init(Uuid::new_v4)
}

/// Build the filter: `STRATA_LOG` wins, otherwise `level` for our crates.
fn env_filter(level: Level) -> miette::Result<EnvFilter> {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_directive(level)))
        .map_err(|e| miette::miette!("Failed to create tracing filter: {e}"))
}

fn default_directive(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber.
pub fn init_tracing(level: Level, target: LogTarget<'_>) -> miette::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(level)?);

    match target {
        LogTarget::Stderr => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false);
            registry.with(layer).init();
        }
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    miette::miette!("Failed to create log directory {}: {e}", parent.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| miette::miette!("Failed to open log file {}: {e}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true);
            registry.with(layer).init();
        }
    }

    tracing::debug!(
        session_id = %session_id(),
        version = env!("CARGO_PKG_VERSION"),
        "Tracing initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_covers_every_crate() {
        let directive = default_directive(Level::INFO);
        assert!(directive.starts_with("strata=info,"));
        assert!(directive.contains("strata_daemon=info"));
        assert_eq!(directive.split(',').count(), CRATES.len());
    }

    #[test]
    fn test_env_overrides_level() {
        temp_env::with_var(LOG_ENV, Some("strata_daemon=trace"), || {
            let filter = env_filter(Level::WARN).unwrap();
            assert!(filter.to_string().contains("strata_daemon=trace"));
        });
    }

    #[test]
    fn test_session_id_is_stable() {
        assert_eq!(session_id(), session_id());
    }
}
