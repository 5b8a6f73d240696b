//! Error types for fingerprinting

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for hash computation
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while reading an input
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(strata::hash::io),
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

    /// A glob pattern could not be compiled
    #[error("Invalid glob pattern '{pattern}': {message}")]
    #[diagnostic(code(strata::hash::glob))]
    Glob {
        /// The pattern
        pattern: String,
        /// Compiler message
        message: String,
    },

    /// A declared input file does not exist
    #[error("Declared input not found: {}", path.display())]
    #[diagnostic(
        code(strata::hash::missing_input),
        help("Remove the entry from \"inputs\" or create the file")
    )]
    MissingInput {
        /// The missing file
        path: Box<Path>,
    },

    /// An upstream task has not been hashed yet
    #[error("Task {task} depends on {dependency}, which has not been hashed")]
    #[diagnostic(
        code(strata::hash::missing_dependency_hash),
        help("Hash tasks in dependency order")
    )]
    MissingDependencyHash {
        /// Task being hashed
        task: String,
        /// Dependency without a hash
        dependency: String,
    },

    /// A walk over package files failed
    #[error("Failed to walk {}: {message}", path.display())]
    #[diagnostic(code(strata::hash::walk))]
    Walk {
        /// Walk root
        path: Box<Path>,
        /// Walker message
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(strata::hash::serialization))]
    Serialization {
        /// Error message
        message: String,
    },

    /// Path conversion error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] strata_paths::Error),

    /// Configuration error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] strata_config::Error),
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

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

/// Result type for hash computation
pub type Result<T> = std::result::Result<T, Error>;
