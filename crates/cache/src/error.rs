//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(strata::cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Archive entry name is not valid UTF-8 or otherwise unusable
    #[error("Malformed archive entry name: {name:?}")]
    #[diagnostic(code(strata::cache::malformed_name))]
    MalformedName {
        /// The raw name, lossily decoded
        name: String,
    },

    /// Archive entry name contains a NUL byte
    #[error("Archive entry name contains NUL: {name:?}")]
    #[diagnostic(code(strata::cache::name_contains_nul))]
    NameContainsNul {
        /// The raw name, lossily decoded
        name: String,
    },

    /// Archive entry name is absolute
    #[error("Archive entry name is absolute: {name}")]
    #[diagnostic(code(strata::cache::absolute_name))]
    AbsoluteName {
        /// The raw name
        name: String,
    },

    /// Archive entry name climbs above the restore anchor
    #[error("Archive entry escapes the restore directory: {name}")]
    #[diagnostic(
        code(strata::cache::path_escapes_anchor),
        help("The cache entry is corrupt or malicious; it will not be restored")
    )]
    PathEscapesAnchor {
        /// The raw name
        name: String,
    },

    /// An ancestor of an entry is a symlink leading outside the restore anchor
    #[error("{} is a symlink to {}, outside the restore directory", path.display(), target.display())]
    #[diagnostic(
        code(strata::cache::symlink_escapes_anchor),
        help("The cache entry is corrupt or malicious; it will not be restored")
    )]
    SymlinkEscapesAnchor {
        /// The symlink
        path: Box<Path>,
        /// Where it resolves to
        target: Box<Path>,
    },

    /// An ancestor of an entry exists but is not a directory
    #[error("Not a directory: {}", path.display())]
    #[diagnostic(code(strata::cache::not_a_directory))]
    NotADirectory {
        /// The offending path
        path: Box<Path>,
    },

    /// The entry is neither a regular file, a directory nor a symlink
    #[error("Unsupported file type {kind} for {name}")]
    #[diagnostic(code(strata::cache::unsupported_file_type))]
    UnsupportedFileType {
        /// Entry or file name
        name: String,
        /// Description of the type
        kind: String,
    },

    /// The archive ended early or could not be decoded
    #[error("Cache archive is truncated or corrupt: {message}")]
    #[diagnostic(code(strata::cache::truncated))]
    Truncated {
        /// Decoder message
        message: String,
    },

    /// Cache keys must be usable as file names
    #[error("Invalid cache key: {key:?}")]
    #[diagnostic(code(strata::cache::invalid_key))]
    InvalidKey {
        /// The key
        key: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(strata::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// The remote transport failed
    #[error("Remote cache error: {message}")]
    #[diagnostic(code(strata::cache::remote))]
    Remote {
        /// Transport message
        message: String,
    },

    /// Restoring an entry failed after files may have been written
    #[error("Failed to restore cache entry {key}")]
    #[diagnostic(
        code(strata::cache::restore_failed),
        help("Files under the restore directory may be incomplete; rebuild them")
    )]
    RestoreFailed {
        /// The cache key
        key: String,
        /// What went wrong
        #[source]
        source: Box<Error>,
    },

    /// Path conversion error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] strata_paths::Error),
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

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
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

    /// Create a remote transport error
    #[must_use]
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote {
            message: msg.into(),
        }
    }

    /// Map an error raised while decoding archive data.
    ///
    /// Reads from the blob only fail on early EOF or corrupt frames, so the
    /// entry is unusable rather than the local filesystem misbehaving.
    pub(crate) fn archive_read(source: &std::io::Error) -> Self {
        Self::Truncated {
            message: source.to_string(),
        }
    }

    /// Wrap a failure that happened while writing into the anchor.
    pub(crate) fn restore_failed(key: &str, source: Self) -> Self {
        Self::RestoreFailed {
            key: key.to_string(),
            source: Box::new(source),
        }
    }

    /// Whether the restore directory may hold partial output.
    #[must_use]
    pub fn touched_anchor(&self) -> bool {
        matches!(self, Self::RestoreFailed { .. })
    }

    /// Whether this error means the archive itself is untrustworthy.
    #[must_use]
    pub fn is_integrity_error(&self) -> bool {
        if let Self::RestoreFailed { source, .. } = self {
            return source.is_integrity_error();
        }
        matches!(
            self,
            Self::MalformedName { .. }
                | Self::NameContainsNul { .. }
                | Self::AbsoluteName { .. }
                | Self::PathEscapesAnchor { .. }
                | Self::SymlinkEscapesAnchor { .. }
                | Self::UnsupportedFileType { .. }
                | Self::Truncated { .. }
        )
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
