//! Where strata keeps its files.
//!
//! | Directory | Contents | Override |
//! |-----------|----------|----------|
//! | cache dir | Local cache entries (`<key>.tar.zst`, `<key>-meta.json`) | `STRATA_CACHE_DIR` |
//! | data dir | Daemon logs and cookie directories | `STRATA_DATA_DIR` |
//! | runtime dir | Daemon socket and pid files | `STRATA_RUNTIME_DIR` |
//!
//! Daemon files are namespaced per repository by [`repo_hash`], so one machine
//! can run a daemon for each checkout.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use strata_paths::AbsolutePath;

/// Length of the repository hash prefix used in daemon file names.
const REPO_HASH_LEN: usize = 16;

fn env_override(var: &str) -> Option<PathBuf> {
    match std::env::var(var) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => None,
    }
}

fn absolute(path: PathBuf, var: &str) -> Result<AbsolutePath> {
    AbsolutePath::new(path)
        .map_err(|e| Error::configuration(format!("{var} must be an absolute path: {e}")))
}

/// Local cache directory for a repository.
///
/// Resolution order:
/// 1. `STRATA_CACHE_DIR` environment variable
/// 2. `<repo_root>/.strata/cache`
pub fn cache_dir(repo_root: &AbsolutePath) -> Result<AbsolutePath> {
    if let Some(dir) = env_override("STRATA_CACHE_DIR") {
        return absolute(dir, "STRATA_CACHE_DIR");
    }
    Ok(AbsolutePath::new(
        repo_root.as_path().join(".strata").join("cache"),
    )?)
}

/// Directory for daemon logs and cookies.
///
/// Resolution order:
/// 1. `STRATA_DATA_DIR` environment variable
/// 2. Platform data directory + `/strata`
pub fn data_dir() -> Result<AbsolutePath> {
    if let Some(dir) = env_override("STRATA_DATA_DIR") {
        return absolute(dir, "STRATA_DATA_DIR");
    }

    // dirs::data_dir() returns:
    // - Linux: XDG_DATA_HOME (~/.local/share)
    // - macOS: ~/Library/Application Support
    // - Windows: {FOLDERID_RoamingAppData}
    let base = dirs::data_dir()
        .ok_or_else(|| Error::configuration("Could not determine data directory"))?;
    absolute(base.join("strata"), "data directory")
}

/// Directory for daemon sockets and pid files.
///
/// Resolution order:
/// 1. `STRATA_RUNTIME_DIR` environment variable
/// 2. Platform runtime directory (or temp directory as fallback) + `/strata`
pub fn runtime_dir() -> Result<AbsolutePath> {
    if let Some(dir) = env_override("STRATA_RUNTIME_DIR") {
        return absolute(dir, "STRATA_RUNTIME_DIR");
    }

    // runtime_dir() is XDG_RUNTIME_DIR on Linux and None elsewhere
    let base = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    absolute(base.join("strata"), "runtime directory")
}

/// Short, stable identifier for a repository root.
#[must_use]
pub fn repo_hash(repo_root: &AbsolutePath) -> String {
    let digest = Sha256::digest(repo_root.as_path().to_string_lossy().as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(REPO_HASH_LEN);
    hash
}

/// Files belonging to the daemon serving one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    /// Per-repository runtime directory holding socket and pid file
    pub runtime_dir: AbsolutePath,
    /// Unix socket the daemon listens on
    pub sock_file: AbsolutePath,
    /// Pid file, also the advisory lock held for the daemon's lifetime
    pub pid_file: AbsolutePath,
    /// Daemon log file
    pub log_file: AbsolutePath,
    /// Private directory for cookie files
    pub cookie_dir: AbsolutePath,
}

/// Compute the daemon file layout for `repo_root`.
pub fn daemon_paths(repo_root: &AbsolutePath) -> Result<DaemonPaths> {
    let hash = repo_hash(repo_root);
    let runtime = runtime_dir()?.join_component(&hash)?;
    let data = data_dir()?;
    Ok(DaemonPaths {
        sock_file: runtime.join_component("strata.sock")?,
        pid_file: runtime.join_component("strata.pid")?,
        runtime_dir: runtime,
        log_file: data.join_component(&format!("{hash}.log"))?,
        cookie_dir: data.join_component("cookies")?.join_component(&hash)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> AbsolutePath {
        AbsolutePath::new(std::env::temp_dir().join("some-repo")).unwrap()
    }

    #[test]
    fn test_cache_dir_default() {
        temp_env::with_var_unset("STRATA_CACHE_DIR", || {
            let dir = cache_dir(&repo()).expect("cache_dir should succeed");
            assert!(dir.as_path().ends_with(".strata/cache"), "{dir}");
        });
    }

    #[test]
    fn test_cache_dir_override() {
        let test_dir = std::env::temp_dir().join("strata-test-cache");
        temp_env::with_var("STRATA_CACHE_DIR", Some(&test_dir), || {
            let dir = cache_dir(&repo()).expect("cache_dir should succeed");
            assert_eq!(dir.as_path(), test_dir);
        });
    }

    #[test]
    fn test_relative_override_rejected() {
        temp_env::with_var("STRATA_RUNTIME_DIR", Some("relative/dir"), || {
            assert!(matches!(
                runtime_dir(),
                Err(Error::Configuration { .. })
            ));
        });
    }

    #[test]
    fn test_runtime_dir_default() {
        temp_env::with_var_unset("STRATA_RUNTIME_DIR", || {
            let dir = runtime_dir().expect("runtime_dir should succeed");
            assert!(dir.as_path().ends_with("strata"), "{dir}");
        });
    }

    #[test]
    fn test_repo_hash_is_stable_and_short() {
        let a = repo_hash(&repo());
        assert_eq!(a, repo_hash(&repo()));
        assert_eq!(a.len(), REPO_HASH_LEN);
        let other = AbsolutePath::new(std::env::temp_dir().join("other-repo")).unwrap();
        assert_ne!(a, repo_hash(&other));
    }

    #[test]
    fn test_daemon_paths_layout() {
        let runtime = std::env::temp_dir().join("strata-rt");
        let data = std::env::temp_dir().join("strata-data");
        temp_env::with_vars(
            [
                ("STRATA_RUNTIME_DIR", Some(&runtime)),
                ("STRATA_DATA_DIR", Some(&data)),
            ],
            || {
                let paths = daemon_paths(&repo()).expect("daemon_paths should succeed");
                let hash = repo_hash(&repo());
                assert_eq!(paths.runtime_dir.as_path(), runtime.join(&hash));
                assert!(paths.sock_file.as_path().ends_with("strata.sock"));
                assert!(paths.pid_file.as_path().ends_with("strata.pid"));
                assert_eq!(
                    paths.log_file.as_path(),
                    data.join(format!("{hash}.log"))
                );
                assert_eq!(
                    paths.cookie_dir.as_path(),
                    data.join("cookies").join(&hash)
                );
            },
        );
    }
}
