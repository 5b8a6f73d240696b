use crate::env::EnvironmentVariableMap;
use crate::object::hash_object;
use crate::package::package_file_hashes;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use strata_config::{TaskDefinition, TaskOutputs};
use strata_paths::{AbsolutePath, AnchoredPath, AnchoredUnixPath};

/// One task of one package, as resolved by the task graph.
#[derive(Debug, Clone)]
pub struct PackageTask<'a> {
    /// `package#task`
    pub task_id: String,
    /// Task name without the package
    pub task: String,
    /// Package directory relative to the repository root
    pub package_dir: AnchoredPath,
    /// Resolved pipeline entry
    pub definition: &'a TaskDefinition,
    /// External dependency hash of the package
    pub external_deps_hash: String,
    /// Arguments forwarded to the task's command
    pub pass_through_args: Vec<String>,
    /// Task ids this task depends on (both same-package and topological)
    pub dependencies: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskHashable<'a> {
    global_hash: &'a str,
    package_dir: AnchoredUnixPath,
    hash_of_files: String,
    external_deps_hash: &'a str,
    task: &'a str,
    outputs: &'a TaskOutputs,
    pass_through_args: &'a [String],
    env: Vec<String>,
    task_dependency_hashes: Vec<String>,
}

/// Computes task hashes and remembers them for downstream tasks.
///
/// Hashing is safe to run from several worker threads as long as each task
/// is hashed after its dependencies. The lock is only held to read or insert
/// a finished hash, never while files are read.
pub struct TaskHasher {
    global_hash: String,
    repo_root: AbsolutePath,
    env: EnvironmentVariableMap,
    hashes: RwLock<HashMap<String, String>>,
}

impl TaskHasher {
    /// Create a hasher for one run.
    #[must_use]
    pub fn new(
        global_hash: impl Into<String>,
        repo_root: AbsolutePath,
        env: EnvironmentVariableMap,
    ) -> Self {
        Self {
            global_hash: global_hash.into(),
            repo_root,
            env,
            hashes: RwLock::new(HashMap::new()),
        }
    }

    /// The global hash folded into every task hash.
    #[must_use]
    pub fn global_hash(&self) -> &str {
        &self.global_hash
    }

    /// A previously computed hash.
    #[must_use]
    pub fn task_hash(&self, task_id: &str) -> Option<String> {
        self.hashes.read().get(task_id).cloned()
    }

    fn dependency_hashes(&self, task: &PackageTask<'_>) -> Result<Vec<String>> {
        let hashes = self.hashes.read();
        let mut resolved = Vec::with_capacity(task.dependencies.len());
        for dependency in &task.dependencies {
            let hash = hashes
                .get(dependency)
                .ok_or_else(|| Error::MissingDependencyHash {
                    task: task.task_id.clone(),
                    dependency: dependency.clone(),
                })?;
            resolved.push(hash.clone());
        }
        resolved.sort();
        resolved.dedup();
        Ok(resolved)
    }

    /// Hash a task and record the result under its id.
    pub fn calculate_task_hash(&self, task: &PackageTask<'_>) -> Result<String> {
        let _span = tracing::debug_span!("calculate_task_hash", task = %task.task_id).entered();

        let task_dependency_hashes = self.dependency_hashes(task)?;
        let file_hashes =
            package_file_hashes(&self.repo_root, &task.package_dir, &task.definition.inputs)?;

        let hashable = TaskHashable {
            global_hash: &self.global_hash,
            package_dir: task.package_dir.to_unix()?,
            hash_of_files: hash_object(&file_hashes)?,
            external_deps_hash: &task.external_deps_hash,
            task: &task.task,
            outputs: &task.definition.outputs,
            pass_through_args: &task.pass_through_args,
            env: self.env.pairs_for(&task.definition.env_var_dependencies),
            task_dependency_hashes,
        };
        let hash = hash_object(&hashable)?;

        tracing::debug!(
            hash = %hash,
            files = file_hashes.len(),
            dependencies = task.dependencies.len(),
            "Computed task hash"
        );
        self.hashes.write().insert(task.task_id.clone(), hash.clone());
        Ok(hash)
    }
}
