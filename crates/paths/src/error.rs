//! Error types for path conversions

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by checked path conversions
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Expected an absolute path
    #[error("Path is not absolute: {}", path.display())]
    #[diagnostic(code(strata::paths::not_absolute))]
    NotAbsolute {
        /// The offending path
        path: PathBuf,
    },

    /// Expected a relative path without root or prefix
    #[error("Path is not anchored (has a root or prefix): {}", path.display())]
    #[diagnostic(code(strata::paths::not_anchored))]
    NotAnchored {
        /// The offending path
        path: PathBuf,
    },

    /// Anchored paths may not traverse upwards
    #[error("Path contains a parent traversal: {}", path.display())]
    #[diagnostic(code(strata::paths::parent_traversal))]
    ParentTraversal {
        /// The offending path
        path: PathBuf,
    },

    /// A path was not below the anchor it was resolved against
    #[error("{} is not under {}", path.display(), anchor.display())]
    #[diagnostic(code(strata::paths::not_under_anchor))]
    NotUnderAnchor {
        /// The path being anchored
        path: PathBuf,
        /// The anchor
        anchor: PathBuf,
    },

    /// A single path segment was empty, `.`, `..` or contained a separator
    #[error("Invalid path segment: {segment:?}")]
    #[diagnostic(code(strata::paths::invalid_segment))]
    InvalidSegment {
        /// The offending segment
        segment: String,
    },

    /// The path cannot be expressed as UTF-8
    #[error("Path is not valid UTF-8: {}", path.display())]
    #[diagnostic(code(strata::paths::non_utf8))]
    NonUtf8 {
        /// The offending path
        path: PathBuf,
    },

    /// I/O error while resolving a path
    #[error("I/O {operation} failed")]
    #[diagnostic(code(strata::paths::io))]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Operation that failed
        operation: String,
    },
}

/// Result type for path operations
pub type Result<T> = std::result::Result<T, Error>;
