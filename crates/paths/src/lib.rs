//! Typed paths for strata.
//!
//! Paths inside the build cache play three distinct roles, and mixing them up
//! is how archive restores end up writing outside the directory they were
//! aimed at. Each role gets its own type:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`AbsolutePath`] | A fully-qualified path on the local filesystem |
//! | [`AnchoredPath`] | A path relative to some anchor, using system separators |
//! | [`AnchoredUnixPath`] | An anchored path using `/` separators, as stored in archives and hashes |
//!
//! Conversions are explicit and checked. An anchored path only becomes an
//! absolute one through [`AnchoredPath::restore_anchor`].

mod error;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// An absolute filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct AbsolutePath(PathBuf);

impl AbsolutePath {
    /// Wrap a path, rejecting anything that is not absolute.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.is_absolute() {
            Ok(Self(path))
        } else {
            Err(Error::NotAbsolute { path })
        }
    }

    /// The current working directory.
    pub fn current_dir() -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|source| Error::Io {
            source,
            operation: "current_dir".to_string(),
        })?;
        Self::new(cwd)
    }

    /// Borrow the underlying path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Consume into the underlying [`PathBuf`].
    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Join a single path segment.
    ///
    /// Segments containing a separator or equal to `..` are rejected so the
    /// result always stays below `self`.
    pub fn join_component(&self, segment: &str) -> Result<Self> {
        if segment.is_empty()
            || segment == "."
            || segment == ".."
            || segment.contains('/')
            || (cfg!(windows) && segment.contains('\\'))
        {
            return Err(Error::InvalidSegment {
                segment: segment.to_string(),
            });
        }
        Ok(Self(self.0.join(segment)))
    }

    /// Join an anchored path onto this one.
    #[must_use]
    pub fn resolve(&self, anchored: &AnchoredPath) -> Self {
        anchored.restore_anchor(self)
    }

    /// Express `path` relative to `self`.
    ///
    /// Fails when `path` is not underneath `self`.
    pub fn anchor(&self, path: &Self) -> Result<AnchoredPath> {
        let relative = path
            .0
            .strip_prefix(&self.0)
            .map_err(|_| Error::NotUnderAnchor {
                path: path.0.clone(),
                anchor: self.0.clone(),
            })?;
        AnchoredPath::new(relative)
    }

    /// The parent directory, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.parent().map(|p| Self(p.to_path_buf()))
    }

    /// The final path component, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<&OsStr> {
        self.0.file_name()
    }

    /// Whether anything exists at this path (without following symlinks).
    #[must_use]
    pub fn exists(&self) -> bool {
        self.0.symlink_metadata().is_ok()
    }
}

impl fmt::Display for AbsolutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for AbsolutePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl TryFrom<PathBuf> for AbsolutePath {
    type Error = Error;

    fn try_from(path: PathBuf) -> Result<Self> {
        Self::new(path)
    }
}

impl From<AbsolutePath> for PathBuf {
    fn from(path: AbsolutePath) -> Self {
        path.0
    }
}

/// A path relative to an anchor directory, using system separators.
///
/// Anchored paths never contain a root, a prefix or `..`. They deliberately do
/// not implement `AsRef<Path>`: filesystem access goes through
/// [`AnchoredPath::restore_anchor`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnchoredPath(PathBuf);

impl AnchoredPath {
    /// Check and wrap a relative path. `.` components are dropped.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(Error::ParentTraversal {
                        path: path.to_path_buf(),
                    });
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::NotAnchored {
                        path: path.to_path_buf(),
                    });
                }
            }
        }
        Ok(Self(normalized))
    }

    /// Build from already-validated segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut path = PathBuf::new();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::InvalidSegment {
                    segment: segment.to_string(),
                });
            }
            path.push(segment);
        }
        Self::new(path)
    }

    /// The anchor itself (no segments).
    #[must_use]
    pub fn root() -> Self {
        Self(PathBuf::new())
    }

    /// Whether this path refers to the anchor itself.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.as_os_str().is_empty()
    }

    /// Turn this into an absolute path under `anchor`.
    #[must_use]
    pub fn restore_anchor(&self, anchor: &AbsolutePath) -> AbsolutePath {
        if self.is_root() {
            return anchor.clone();
        }
        AbsolutePath(anchor.0.join(&self.0))
    }

    /// The path's segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &OsStr> {
        self.0.components().filter_map(|c| match c {
            Component::Normal(s) => Some(s),
            _ => None,
        })
    }

    /// Number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The parent path; `None` for the anchor itself.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self(
            self.0.parent().map(Path::to_path_buf).unwrap_or_default(),
        ))
    }

    /// The final segment.
    #[must_use]
    pub fn file_name(&self) -> Option<&OsStr> {
        self.0.file_name()
    }

    /// Append another anchored path.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        Self(self.0.join(&other.0))
    }

    /// Borrow the relative path for display or comparison.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Convert to the `/`-separated form.
    ///
    /// Fails on non-UTF-8 segments.
    pub fn to_unix(&self) -> Result<AnchoredUnixPath> {
        let mut out = String::new();
        for segment in self.segments() {
            let segment = segment.to_str().ok_or_else(|| Error::NonUtf8 {
                path: self.0.clone(),
            })?;
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(segment);
        }
        Ok(AnchoredUnixPath(out))
    }
}

impl fmt::Display for AnchoredPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// An anchored path with `/` separators.
///
/// This is the form written into archives and fed to the fingerprint engine,
/// so it must be identical across platforms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AnchoredUnixPath(String);

impl AnchoredUnixPath {
    /// Check and wrap a `/`-separated relative path.
    ///
    /// Leading `./` and empty or `.` segments are dropped; a leading `/`
    /// or a `..` segment is rejected.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let raw = path.into();
        if raw.starts_with('/') {
            return Err(Error::NotAnchored {
                path: PathBuf::from(raw),
            });
        }
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    return Err(Error::ParentTraversal {
                        path: PathBuf::from(raw),
                    });
                }
                s => segments.push(s),
            }
        }
        Ok(Self(segments.join("/")))
    }

    /// The path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to system separators.
    pub fn to_system(&self) -> Result<AnchoredPath> {
        AnchoredPath::from_segments(self.0.split('/').filter(|s| !s.is_empty()))
    }

    /// Append a trailing `/`, the directory marker used in archive entry names.
    #[must_use]
    pub fn to_dir_name(&self) -> String {
        format!("{}/", self.0)
    }
}

impl fmt::Display for AnchoredUnixPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AnchoredUnixPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AnchoredUnixPath> for String {
    fn from(path: AnchoredUnixPath) -> Self {
        path.0
    }
}
