//! Error types for file watching

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for the file watcher, cookie jar and glob watcher
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(code(strata::filewatch::io))]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed
        operation: String,
    },

    /// The native watch could not be established or failed later
    #[error("File watch failed: {message}")]
    #[diagnostic(
        code(strata::filewatch::watch),
        help("On Linux, check fs.inotify.max_user_watches")
    )]
    Watch {
        /// Backend message
        message: String,
    },

    /// The watcher is not running
    #[error("File watcher has not been started")]
    #[diagnostic(code(strata::filewatch::not_started))]
    NotStarted,

    /// The watcher was closed; nothing more will be observed
    #[error("File watching has closed")]
    #[diagnostic(code(strata::filewatch::closed))]
    WatcherClosed,

    /// A cookie event did not arrive in time
    #[error("Timed out after {timeout_ms}ms waiting for cookie {}", path.display())]
    #[diagnostic(
        code(strata::filewatch::cookie_timeout),
        help("The file watcher is lagging; retry the request")
    )]
    CookieTimeout {
        /// The cookie file
        path: Box<Path>,
        /// How long we waited
        timeout_ms: u64,
    },

    /// An output glob failed to compile
    #[error("Invalid glob pattern '{pattern}': {message}")]
    #[diagnostic(code(strata::filewatch::glob))]
    Glob {
        /// The pattern
        pattern: String,
        /// Compiler message
        message: String,
    },
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

    /// Create an error from the notify backend
    #[must_use]
    pub fn watch(source: &notify::Error) -> Self {
        Self::Watch {
            message: source.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CookieTimeout { .. })
    }
}

/// Result type for file watching
pub type Result<T> = std::result::Result<T, Error>;
