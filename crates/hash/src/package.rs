//! Package manager collaborator and per-package file hashing.

use crate::file::{FileHashes, hash_file};
use crate::globwalk::{WalkType, glob_files, is_literal};
use crate::{Error, Result};
use ignore::WalkBuilder;
use strata_paths::{AbsolutePath, AnchoredPath};

/// What the fingerprint engine needs from the package manager layer.
pub trait PackageManager: Send + Sync {
    /// Human-readable name, for logs
    fn name(&self) -> &str;

    /// The manifest file at the repository root (e.g. `package.json`)
    fn spec_file(&self) -> &str;

    /// The lockfile at the repository root
    fn lockfile(&self) -> &str;

    /// Globs that never count as workspace files (e.g. dependency folders)
    fn workspace_ignores(&self, repo_root: &AbsolutePath) -> Result<Vec<String>>;
}

/// The npm layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpmPackageManager;

impl PackageManager for NpmPackageManager {
    fn name(&self) -> &str {
        "npm"
    }

    fn spec_file(&self) -> &str {
        "package.json"
    }

    fn lockfile(&self) -> &str {
        "package-lock.json"
    }

    fn workspace_ignores(&self, _repo_root: &AbsolutePath) -> Result<Vec<String>> {
        Ok(vec!["**/node_modules/**".to_string()])
    }
}

/// Hash the input files of one package, keyed relative to the package.
///
/// Without `inputs` every file not ignored by `.gitignore` is hashed. With
/// `inputs` only their matches are, and a literal input that does not exist
/// is an error.
pub fn package_file_hashes(
    repo_root: &AbsolutePath,
    package_dir: &AnchoredPath,
    inputs: &[String],
) -> Result<FileHashes> {
    let package_root = package_dir.restore_anchor(repo_root);
    let _span = tracing::debug_span!(
        "package_file_hashes",
        package = %package_dir,
        inputs = inputs.len()
    )
    .entered();

    if !inputs.is_empty() {
        for input in inputs.iter().filter(|i| is_literal(i)) {
            let path = AnchoredPath::new(input.trim_start_matches("./"))?.restore_anchor(&package_root);
            if !path.exists() {
                return Err(Error::MissingInput {
                    path: path.as_path().into(),
                });
            }
        }
        let files = glob_files(&package_root, inputs, &[], WalkType::Files)?;
        return crate::file::hash_files(&package_root, files);
    }

    let mut hashes = FileHashes::new();
    let walker = WalkBuilder::new(package_root.as_path())
        .hidden(false)
        .git_ignore(true)
        .require_git(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();
    for entry in walker {
        let entry = entry.map_err(|e| Error::Walk {
            path: package_root.as_path().into(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_none_or(|t| t.is_dir()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(package_root.as_path()) else {
            continue;
        };
        let key = AnchoredPath::new(relative)?.to_unix()?;
        hashes.insert(key, hash_file(entry.path())?);
    }
    tracing::debug!(files = hashes.len(), "Hashed package files");
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn repo() -> (TempDir, AbsolutePath) {
        let dir = TempDir::new().unwrap();
        for (file, contents) in [
            ("packages/web/src/index.ts", "export {}"),
            ("packages/web/package.json", "{}"),
            ("packages/web/.gitignore", "dist\n"),
            ("packages/web/dist/bundle.js", "bundle"),
            ("packages/web/.env.example", "A=1"),
        ] {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        let root = AbsolutePath::new(dir.path()).unwrap();
        (dir, root)
    }

    fn keys(hashes: &FileHashes) -> Vec<&str> {
        hashes.keys().map(|k| k.as_str()).collect()
    }

    #[test]
    fn test_all_files_respect_gitignore() {
        let (_dir, root) = repo();
        let package = AnchoredPath::new("packages/web").unwrap();
        let hashes = package_file_hashes(&root, &package, &[]).unwrap();
        assert_eq!(
            keys(&hashes),
            vec![".env.example", ".gitignore", "package.json", "src/index.ts"]
        );
    }

    #[test]
    fn test_inputs_restrict_files() {
        let (_dir, root) = repo();
        let package = AnchoredPath::new("packages/web").unwrap();
        let hashes =
            package_file_hashes(&root, &package, &["src/**/*.ts".to_string()]).unwrap();
        assert_eq!(keys(&hashes), vec!["src/index.ts"]);
    }

    #[test]
    fn test_missing_literal_input_is_error() {
        let (_dir, root) = repo();
        let package = AnchoredPath::new("packages/web").unwrap();
        let err = package_file_hashes(&root, &package, &["tsconfig.json".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::MissingInput { .. }));
    }

    #[test]
    fn test_npm_collaborator() {
        let (_dir, root) = repo();
        let npm = NpmPackageManager;
        assert_eq!(npm.spec_file(), "package.json");
        assert_eq!(
            npm.workspace_ignores(&root).unwrap(),
            vec!["**/node_modules/**"]
        );
    }
}
