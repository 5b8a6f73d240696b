//! Glob matching over a directory tree.
//!
//! Only the literal prefix of each include pattern is walked, so `src/**/*.ts`
//! never visits `node_modules`.

use crate::{Error, Result};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use strata_paths::{AbsolutePath, AnchoredUnixPath};
use walkdir::WalkDir;

/// Which entries [`glob_files`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkType {
    /// Regular files and symlinks
    Files,
    /// Files, symlinks and directories
    All,
}

fn is_glob_segment(segment: &str) -> bool {
    segment.contains(['*', '?', '[', '{'])
}

pub(crate) fn is_literal(pattern: &str) -> bool {
    !pattern.split('/').any(is_glob_segment)
}

/// The literal directory prefix of a pattern.
///
/// - `src/**/*.ts` -> `src`
/// - `**/*.ts` -> `` (root)
/// - `dist/out.js` -> `dist/out.js`
#[must_use]
pub fn glob_base(pattern: &str) -> String {
    let mut base = Vec::new();
    for segment in pattern.split('/') {
        if is_glob_segment(segment) {
            break;
        }
        if !segment.is_empty() && segment != "." {
            base.push(segment);
        }
    }
    base.join("/")
}

pub(crate) fn compile_glob(pattern: &str) -> Result<Glob> {
    GlobBuilder::new(pattern.trim_start_matches("./"))
        .literal_separator(true)
        .build()
        .map_err(|e| Error::Glob {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

pub(crate) fn compile_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile_glob(pattern)?);
        // `dir/**` should also exclude `dir` itself
        if let Some(dir) = pattern.strip_suffix("/**") {
            builder.add(compile_glob(dir)?);
        }
    }
    builder.build().map_err(|e| Error::Glob {
        pattern: patterns.join(","),
        message: e.to_string(),
    })
}

/// Find every path under `root` matching one of `includes` and none of
/// `excludes`, sorted so parents precede their children.
pub fn glob_files(
    root: &AbsolutePath,
    includes: &[String],
    excludes: &[String],
    walk_type: WalkType,
) -> Result<Vec<AnchoredUnixPath>> {
    let span = tracing::debug_span!(
        "glob_files",
        root = %root,
        includes = includes.len(),
        excludes = excludes.len()
    );
    let _guard = span.enter();

    let exclude_set = if excludes.is_empty() {
        GlobSet::empty()
    } else {
        // Exclusions also prune whole directories
        compile_set(excludes)?
    };

    let mut found = BTreeSet::new();
    for pattern in includes {
        let include = compile_glob(pattern)?.compile_matcher();
        let base = glob_base(pattern);
        let walk_root = if base.is_empty() {
            root.clone()
        } else {
            AnchoredUnixPath::new(base.as_str())?
                .to_system()?
                .restore_anchor(root)
        };
        if !walk_root.exists() {
            tracing::trace!(pattern = %pattern, "Glob base does not exist");
            continue;
        }

        let mut walker = WalkDir::new(walk_root.as_path())
            .follow_links(false)
            .into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| Error::Walk {
                path: walk_root.as_path().into(),
                message: e.to_string(),
            })?;
            let Ok(relative) = entry.path().strip_prefix(root.as_path()) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            let unix = strata_paths::AnchoredPath::new(relative)?.to_unix()?;
            let is_dir = entry.file_type().is_dir();
            if exclude_set.is_match(unix.as_str()) {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }
            if is_dir && walk_type == WalkType::Files {
                continue;
            }
            if include.is_match(unix.as_str()) {
                found.insert(unix);
            }
        }
    }

    tracing::debug!(matched = found.len(), "Glob walk complete");
    Ok(found.into_iter().collect())
}
