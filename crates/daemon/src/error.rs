//! Error types for the daemon and its clients

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for daemon operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(code(strata::daemon::io))]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed
        operation: String,
    },

    /// The socket could not be reached or the exchange failed midway
    #[error("Failed to talk to the daemon: {message}")]
    #[diagnostic(code(strata::daemon::connection))]
    Connection {
        /// What went wrong
        message: String,
    },

    /// Every connection attempt failed
    #[error("Failed to connect to the daemon after {attempts} attempts")]
    #[diagnostic(
        code(strata::daemon::too_many_attempts),
        help("Check the daemon log, or run `strata daemon restart`")
    )]
    TooManyAttempts {
        /// Attempts made
        attempts: u32,
    },

    /// No daemon is running and starting one was not requested
    #[error("The strata daemon is not running")]
    #[diagnostic(code(strata::daemon::not_running))]
    DaemonNotRunning,

    /// Client and daemon were built from different versions
    #[error("Daemon version mismatch: {message}")]
    #[diagnostic(code(strata::daemon::version_mismatch))]
    VersionMismatch {
        /// Server message naming both versions
        message: String,
    },

    /// The pid file names a live process that does not hold the daemon lock
    #[error("Pid file {} names process {pid}, which is not a strata daemon", path.display())]
    #[diagnostic(
        code(strata::daemon::dead_owner),
        help("Remove the pid file once you have confirmed no daemon is running")
    )]
    DeadOwner {
        /// The recorded pid
        pid: u32,
        /// The pid file
        path: Box<Path>,
    },

    /// Another live process holds the daemon lock
    #[error("Daemon lock {} is held by another process", path.display())]
    #[diagnostic(code(strata::daemon::lock_held))]
    LockHeld {
        /// The pid file used as the lock
        path: Box<Path>,
    },

    /// The daemon did not exit after being asked to
    #[error("Timed out waiting for daemon process {pid} to exit")]
    #[diagnostic(code(strata::daemon::shutdown_timeout))]
    ShutdownTimeout {
        /// The daemon pid
        pid: u32,
    },

    /// The daemon's file watcher lagged behind
    #[error("Daemon file watching is lagging: {message}")]
    #[diagnostic(code(strata::daemon::cookie_timeout), help("Retry the request"))]
    CookieTimeout {
        /// Server message
        message: String,
    },

    /// The daemon's file watcher has stopped
    #[error("Daemon file watching has closed")]
    #[diagnostic(code(strata::daemon::watcher_closed))]
    WatcherClosed,

    /// The daemon rejected or failed a request
    #[error("Daemon error: {message}")]
    #[diagnostic(code(strata::daemon::server))]
    Server {
        /// Server message
        message: String,
    },

    /// Configuration error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] strata_config::Error),

    /// File watcher error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Watch(#[from] strata_filewatch::Error),
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create a connection error
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Whether the daemon could not be reached at all, as opposed to
    /// answering with an error.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Connection { .. })
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CookieTimeout { .. })
    }
}

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, Error>;
