//! Canonicalization of archive entry names.
//!
//! Names are untrusted input. They are normalized purely lexically, so nothing
//! on disk is touched before containment is established.

use crate::{Error, Result};
use strata_paths::AnchoredPath;

/// A canonicalized entry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CanonicalName {
    /// Path relative to the restore anchor
    pub path: AnchoredPath,
    /// The stored name ended with `/`
    pub trailing_slash: bool,
}

fn has_windows_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Canonicalize a raw entry name.
///
/// Rejects NUL bytes and absolute names, collapses `.` segments and empty
/// segments, and applies `..` against the segments seen so far. A `..` that
/// would climb above the anchor is an error.
pub(crate) fn canonicalize_name(raw: &[u8]) -> Result<CanonicalName> {
    let lossy = String::from_utf8_lossy(raw).into_owned();
    if raw.contains(&0) {
        return Err(Error::NameContainsNul { name: lossy });
    }
    let name = std::str::from_utf8(raw).map_err(|_| Error::MalformedName {
        name: lossy.clone(),
    })?;

    // Archives written on Windows may carry backslashes; elsewhere a
    // backslash is an ordinary file name character
    let normalized = if cfg!(windows) {
        name.replace('\\', "/")
    } else {
        name.to_string()
    };

    if normalized.starts_with('/') || (cfg!(windows) && has_windows_prefix(&normalized)) {
        return Err(Error::AbsoluteName { name: lossy });
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::PathEscapesAnchor { name: lossy });
                }
            }
            s => segments.push(s),
        }
    }

    Ok(CanonicalName {
        path: AnchoredPath::from_segments(&segments)?,
        trailing_slash: normalized.ends_with('/'),
    })
}
