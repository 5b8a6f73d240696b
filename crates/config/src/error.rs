//! Error types for the config crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while reading configuration
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(strata::config::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed
        operation: String,
    },

    /// The configuration file is not valid JSON or has the wrong shape
    #[error("Failed to parse {}: {message}", path.display())]
    #[diagnostic(code(strata::config::parse))]
    Parse {
        /// Configuration file
        path: Box<Path>,
        /// Parser message
        message: String,
    },

    /// An `env` entry used the `$` prefix
    #[error("Task {task}: env entry {entry:?} must not start with '$'")]
    #[diagnostic(
        code(strata::config::invalid_env),
        help("List environment variable names without the '$' prefix")
    )]
    InvalidEnv {
        /// Task key in the pipeline
        task: String,
        /// Offending entry
        entry: String,
    },

    /// A directory could not be determined or is unusable
    #[error("Configuration error: {message}")]
    #[diagnostic(code(strata::config::configuration))]
    Configuration {
        /// Error message
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

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
}

impl From<strata_paths::Error> for Error {
    fn from(err: strata_paths::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, Error>;
