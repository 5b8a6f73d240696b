//! Pipeline configuration (`strata.json`).
//!
//! The file is parsed once at the start of a run into immutable
//! [`TaskDefinition`]s. Raw entries use a small prefix language:
//!
//! - `outputs`: `!glob` is an exclusion
//! - `dependsOn`: `^task` depends on `task` in every upstream package,
//!   `$VAR` is a deprecated spelling of an env dependency
//! - `globalDependencies`: `$VAR` is a global env var, anything else a file glob

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use strata_paths::AbsolutePath;

/// Name of the root configuration file.
pub const CONFIG_FILE: &str = "strata.json";

/// Separator between package and task in a task id.
const TASK_DELIMITER: char = '#';

const TOPOLOGICAL_PREFIX: char = '^';
const ENV_PREFIX: char = '$';
const EXCLUSION_PREFIX: char = '!';

const DEFAULT_OUTPUTS: [&str; 2] = ["dist/**", "build/**"];

/// Build a task id from package and task name.
#[must_use]
pub fn task_id(package: &str, task: &str) -> String {
    format!("{package}{TASK_DELIMITER}{task}")
}

/// Split a task id into `(package, task)`.
///
/// A bare task name has no package.
#[must_use]
pub fn split_task_id(id: &str) -> (Option<&str>, &str) {
    match id.split_once(TASK_DELIMITER) {
        Some((package, task)) => (Some(package), task),
        None => (None, id),
    }
}

/// How much of a task's terminal output is replayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Replay everything
    #[default]
    Full,
    /// Replay only output of tasks that were not cache hits
    NewOnly,
    /// Print only the task hash
    HashOnly,
    /// Print nothing
    None,
}

/// Output glob patterns of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutputs {
    /// Globs whose matches are cached
    pub inclusions: Vec<String>,
    /// Globs removed from the inclusions
    pub exclusions: Vec<String>,
}

impl TaskOutputs {
    fn from_raw(raw: &[String]) -> Self {
        let mut inclusions = BTreeSet::new();
        let mut exclusions = BTreeSet::new();
        for glob in raw {
            match glob.strip_prefix(EXCLUSION_PREFIX) {
                Some(excluded) => {
                    exclusions.insert(excluded.to_string());
                }
                None => {
                    inclusions.insert(glob.clone());
                }
            }
        }
        Self {
            inclusions: inclusions.into_iter().collect(),
            exclusions: exclusions.into_iter().collect(),
        }
    }
}

/// Resolved configuration of one pipeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    /// Output globs
    pub outputs: TaskOutputs,
    /// Whether results are cached
    pub should_cache: bool,
    /// Same-package task dependencies
    pub task_dependencies: Vec<String>,
    /// Dependencies on tasks in upstream packages
    pub topological_dependencies: Vec<String>,
    /// Environment variables folded into the task hash
    pub env_var_dependencies: Vec<String>,
    /// Input globs; empty means every non-ignored file in the package
    pub inputs: Vec<String>,
    /// Output replay mode
    pub output_mode: OutputMode,
}

impl Default for TaskDefinition {
    fn default() -> Self {
        Self {
            outputs: TaskOutputs::from_raw(&DEFAULT_OUTPUTS.map(String::from)),
            should_cache: true,
            task_dependencies: Vec::new(),
            topological_dependencies: Vec::new(),
            env_var_dependencies: Vec::new(),
            inputs: Vec::new(),
            output_mode: OutputMode::Full,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawTaskDefinition {
    outputs: Option<Vec<String>>,
    cache: Option<bool>,
    depends_on: Option<Vec<String>>,
    inputs: Option<Vec<String>>,
    output_mode: Option<OutputMode>,
    env: Option<Vec<String>>,
}

impl TaskDefinition {
    fn from_raw(name: &str, raw: RawTaskDefinition) -> Result<Self> {
        let outputs = raw.outputs.map_or_else(
            || TaskOutputs::from_raw(&DEFAULT_OUTPUTS.map(String::from)),
            |outputs| TaskOutputs::from_raw(&outputs),
        );

        let mut task_dependencies = BTreeSet::new();
        let mut topological_dependencies = BTreeSet::new();
        let mut env_var_dependencies = BTreeSet::new();

        for dependency in raw.depends_on.unwrap_or_default() {
            if let Some(var) = dependency.strip_prefix(ENV_PREFIX) {
                tracing::warn!(
                    task = %name,
                    entry = %dependency,
                    "Declaring env vars in dependsOn is deprecated; use \"env\" instead"
                );
                env_var_dependencies.insert(var.to_string());
            } else if let Some(task) = dependency.strip_prefix(TOPOLOGICAL_PREFIX) {
                topological_dependencies.insert(task.to_string());
            } else {
                task_dependencies.insert(dependency);
            }
        }

        for var in raw.env.unwrap_or_default() {
            if var.starts_with(ENV_PREFIX) {
                return Err(Error::InvalidEnv {
                    task: name.to_string(),
                    entry: var,
                });
            }
            env_var_dependencies.insert(var);
        }

        Ok(Self {
            outputs,
            should_cache: raw.cache.unwrap_or(true),
            task_dependencies: task_dependencies.into_iter().collect(),
            topological_dependencies: topological_dependencies.into_iter().collect(),
            env_var_dependencies: env_var_dependencies.into_iter().collect(),
            inputs: raw.inputs.unwrap_or_default(),
            output_mode: raw.output_mode.unwrap_or_default(),
        })
    }
}

/// Every configured task, keyed by `task` or `package#task`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Pipeline(BTreeMap<String, TaskDefinition>);

impl Pipeline {
    /// Look up the definition for a task id.
    ///
    /// A `package#task` id without its own entry falls back to the plain
    /// `task` entry.
    #[must_use]
    pub fn task_definition(&self, id: &str) -> Option<&TaskDefinition> {
        if let Some(definition) = self.0.get(id) {
            return Some(definition);
        }
        match split_task_id(id) {
            (Some(_), task) => self.0.get(task),
            (None, _) => None,
        }
    }

    /// Whether the pipeline has an entry for this task id or its task name.
    #[must_use]
    pub fn has_task(&self, id: &str) -> bool {
        self.task_definition(id).is_some()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &TaskDefinition)> {
        self.0.iter()
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, key: impl Into<String>, definition: TaskDefinition) {
        self.0.insert(key.into(), definition);
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRootConfig {
    #[serde(default)]
    global_dependencies: Vec<String>,
    #[serde(default)]
    global_env: Vec<String>,
    #[serde(default)]
    pipeline: BTreeMap<String, RawTaskDefinition>,
}

/// Parsed root `strata.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootConfig {
    /// Global file dependency globs
    pub global_dependencies: Vec<String>,
    /// Global environment variable names
    pub global_env: Vec<String>,
    /// Task definitions
    pub pipeline: Pipeline,
}

impl RootConfig {
    /// Load `strata.json` from the repository root.
    ///
    /// A missing file yields an empty configuration.
    pub fn load(repo_root: &AbsolutePath) -> Result<Self> {
        let path = repo_root.as_path().join(CONFIG_FILE);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No configuration file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        Self::parse(&contents, &path)
    }

    /// Parse configuration text; `origin` is only used in error messages.
    pub fn parse(contents: &str, origin: &Path) -> Result<Self> {
        let raw: RawRootConfig = serde_json::from_str(contents).map_err(|e| Error::Parse {
            path: origin.into(),
            message: e.to_string(),
        })?;

        let mut global_dependencies = BTreeSet::new();
        let mut global_env = BTreeSet::new();
        for dependency in raw.global_dependencies {
            match dependency.strip_prefix(ENV_PREFIX) {
                Some(var) => {
                    global_env.insert(var.to_string());
                }
                None => {
                    global_dependencies.insert(dependency);
                }
            }
        }
        for var in raw.global_env {
            if var.starts_with(ENV_PREFIX) {
                return Err(Error::InvalidEnv {
                    task: "globalEnv".to_string(),
                    entry: var,
                });
            }
            global_env.insert(var);
        }

        let mut pipeline = Pipeline::default();
        for (name, raw_definition) in raw.pipeline {
            let definition = TaskDefinition::from_raw(&name, raw_definition)?;
            pipeline.insert(name, definition);
        }

        Ok(Self {
            global_dependencies: global_dependencies.into_iter().collect(),
            global_env: global_env.into_iter().collect(),
            pipeline,
        })
    }
}
