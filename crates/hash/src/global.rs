use crate::env::{BUILTIN_ENV_VARS, EnvironmentVariableMap};
use crate::file::{FileHashes, hash_files};
use crate::globwalk::{WalkType, glob_files};
use crate::object::hash_object;
use crate::package::PackageManager;
use crate::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use strata_config::{Pipeline, RootConfig};
use strata_paths::{AbsolutePath, AnchoredUnixPath};

/// Versioned with the archive format; bumping it invalidates every cache entry.
pub const GLOBAL_CACHE_KEY: &str = "strata/cache-item:tar+zstd/v1";

/// Repository-wide inputs to the global hash.
pub struct GlobalHashInputs<'a> {
    /// Repository root
    pub repo_root: &'a AbsolutePath,
    /// Parsed `strata.json`
    pub config: &'a RootConfig,
    /// External dependency hash of the root package
    pub root_external_deps_hash: &'a str,
    /// Package manager collaborator
    pub package_manager: &'a dyn PackageManager,
    /// Whether lockfile contents were resolved into dependency hashes
    pub has_lockfile: bool,
    /// Environment snapshot
    pub env: &'a EnvironmentVariableMap,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GlobalHashable<'a> {
    global_file_hash_map: FileHashes,
    root_external_deps_hash: &'a str,
    hashed_sorted_env_pairs: Vec<String>,
    global_cache_key: &'static str,
    pipeline: &'a Pipeline,
}

/// Compute the global hash.
pub fn calculate_global_hash(inputs: &GlobalHashInputs<'_>) -> Result<String> {
    let _span = tracing::debug_span!("calculate_global_hash", root = %inputs.repo_root).entered();

    let mut env_names: BTreeSet<String> = BUILTIN_ENV_VARS.iter().map(|s| (*s).to_string()).collect();
    env_names.extend(inputs.config.global_env.iter().cloned());
    env_names.extend(inputs.env.marker_names());
    let env_names: Vec<String> = env_names.into_iter().collect();
    let env_pairs = inputs.env.pairs_for(&env_names);
    tracing::debug!(vars = ?env_names, "Global hash env vars");

    let mut global_files: BTreeSet<AnchoredUnixPath> = BTreeSet::new();
    if !inputs.config.global_dependencies.is_empty() {
        let ignores = inputs.package_manager.workspace_ignores(inputs.repo_root)?;
        global_files.extend(glob_files(
            inputs.repo_root,
            &inputs.config.global_dependencies,
            &ignores,
            WalkType::Files,
        )?);
    }

    if !inputs.has_lockfile {
        // Without resolved lockfile information the raw manifest and lockfile
        // stand in for it
        for name in [
            inputs.package_manager.spec_file(),
            inputs.package_manager.lockfile(),
        ] {
            let file = AnchoredUnixPath::new(name)?;
            if file.to_system()?.restore_anchor(inputs.repo_root).exists() {
                global_files.insert(file);
            } else {
                tracing::debug!(
                    file = %name,
                    package_manager = inputs.package_manager.name(),
                    "Package manager file absent, not hashed"
                );
            }
        }
    }

    let hashable = GlobalHashable {
        global_file_hash_map: hash_files(inputs.repo_root, global_files)?,
        root_external_deps_hash: inputs.root_external_deps_hash,
        hashed_sorted_env_pairs: env_pairs,
        global_cache_key: GLOBAL_CACHE_KEY,
        pipeline: &inputs.config.pipeline,
    };
    let hash = hash_object(&hashable)?;
    tracing::debug!(global_hash = %hash, files = hashable.global_file_hash_map.len(), "Computed global hash");
    Ok(hash)
}
