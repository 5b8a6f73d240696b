//! Configuration for strata.
//!
//! Two concerns live here:
//! - [`layout`]: where caches, daemon sockets, pid files, logs and cookies go,
//!   with environment overrides for tests and CI
//! - [`pipeline`]: parsing `strata.json` into immutable [`TaskDefinition`]s

pub mod layout;
mod error;
pub mod pipeline;

pub use layout::{DaemonPaths, cache_dir, daemon_paths, data_dir, repo_hash, runtime_dir};
pub use error::{Error, Result};
pub use pipeline::{
    CONFIG_FILE, OutputMode, Pipeline, RootConfig, TaskDefinition, TaskOutputs, split_task_id,
    task_id,
};
