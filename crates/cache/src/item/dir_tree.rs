//! Directory bookkeeping for a single restore.
//!
//! Consecutive archive entries usually share long prefixes, so the tree
//! remembers which ancestors it has already created or verified and the real
//! directory each one resolved to. An entry that diverges from the cached
//! prefix rolls the tree back to the longest common ancestor, and every
//! segment past that point is checked against the filesystem again.

use crate::{Error, Result};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use strata_paths::AnchoredPath;

/// Mode for ancestors that the archive does not list explicitly.
const DEFAULT_DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedDirTree {
    /// `anchor_at_depth[i]` is the real directory reached after `prefix[..i]`
    anchor_at_depth: Vec<PathBuf>,
    prefix: Vec<OsString>,
}

impl CachedDirTree {
    /// Start a tree at the (already canonical) restore anchor.
    pub fn new(anchor: PathBuf) -> Self {
        Self {
            anchor_at_depth: vec![anchor],
            prefix: Vec::new(),
        }
    }

    fn root(&self) -> &Path {
        &self.anchor_at_depth[0]
    }

    /// Number of leading segments of `segments` already cached.
    fn common_depth(&self, segments: &[&OsStr]) -> usize {
        self.prefix
            .iter()
            .zip(segments)
            .take_while(|(cached, wanted)| cached.as_os_str() == **wanted)
            .count()
    }

    /// The deepest cached directory for `path` and the segments still to walk.
    pub fn starting_point<'p>(&self, path: &'p AnchoredPath) -> (PathBuf, Vec<&'p OsStr>) {
        let segments: Vec<&OsStr> = path.segments().collect();
        let depth = self.common_depth(&segments);
        (
            self.anchor_at_depth[depth].clone(),
            segments[depth..].to_vec(),
        )
    }

    fn truncate(&mut self, depth: usize) {
        self.prefix.truncate(depth);
        self.anchor_at_depth.truncate(depth + 1);
    }

    fn push(&mut self, segment: &OsStr, resolved: PathBuf) {
        self.prefix.push(segment.to_os_string());
        self.anchor_at_depth.push(resolved);
    }

    /// Ensure `dir` exists below the anchor and return the real directory.
    ///
    /// The cache is cut back to `dir` itself before returning, so a deeper
    /// directory cached earlier is looked up again the next time it is
    /// needed. Leaf entries resolve their parent through here, which is what
    /// keeps a directory replaced by a leaf symlink from being trusted.
    ///
    /// Segments are created one at a time; a recursive create could follow a
    /// planted symlink partway down. An existing symlink segment is only
    /// followed when it resolves to a directory inside the anchor. `mode`
    /// applies to the final segment if it has to be created.
    pub fn safe_mkdir_all(&mut self, dir: &AnchoredPath, mode: u32) -> Result<PathBuf> {
        let (mut current, remaining) = self.starting_point(dir);
        // Roll back to the longest common ancestor before walking further
        self.truncate(dir.depth() - remaining.len());

        let last = remaining.len().saturating_sub(1);
        for (index, segment) in remaining.into_iter().enumerate() {
            let candidate = current.join(segment);
            let resolved = match fs::symlink_metadata(&candidate) {
                Ok(meta) if meta.is_dir() => candidate,
                Ok(meta) if meta.file_type().is_symlink() => self.follow_symlink(&candidate)?,
                Ok(_) => {
                    return Err(Error::NotADirectory {
                        path: candidate.into(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    let mode = if index == last { mode } else { DEFAULT_DIR_MODE };
                    create_dir(&candidate, mode)?;
                    candidate
                }
                Err(e) => return Err(Error::io(e, &candidate, "lstat")),
            };
            self.push(segment, resolved.clone());
            current = resolved;
        }
        Ok(current)
    }

    fn follow_symlink(&self, link: &Path) -> Result<PathBuf> {
        let target = fs::canonicalize(link).map_err(|e| Error::io(e, link, "canonicalize"))?;
        if !target.starts_with(self.root()) {
            return Err(Error::SymlinkEscapesAnchor {
                path: link.into(),
                target: target.into(),
            });
        }
        if !target.is_dir() {
            return Err(Error::NotADirectory { path: link.into() });
        }
        tracing::trace!(link = %link.display(), target = %target.display(), "Following contained symlink");
        Ok(target)
    }
}

fn create_dir(path: &Path, mode: u32) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder
        .create(path)
        .map_err(|e| Error::io(e, path, "create_dir"))
}
