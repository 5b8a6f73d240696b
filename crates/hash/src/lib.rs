//! Fingerprint engine for strata.
//!
//! A fingerprint is the SHA-256 of a canonical JSON serialization of a
//! struct whose unordered fields have already been sorted by the caller.
//! Two fingerprints matter:
//!
//! - the **global hash**, over repository-wide inputs (global files, global
//!   env vars, the pipeline and a cache format constant)
//! - the **task hash**, over the global hash, the task's own files, env vars
//!   and outputs, and the hashes of every upstream task
//!
//! The task hash is the cache key.

mod env;
mod error;
mod file;
mod global;
mod globwalk;
mod object;
mod package;
mod task;

pub use env::{BUILTIN_ENV_VARS, EnvironmentVariableMap, HASH_ENV_MARKER};
pub use error::{Error, Result};
pub use file::{FileHashes, hash_file, hash_files};
pub use global::{GLOBAL_CACHE_KEY, GlobalHashInputs, calculate_global_hash};
pub use globwalk::{WalkType, glob_base, glob_files};
pub use object::hash_object;
pub use package::{NpmPackageManager, PackageManager, package_file_hashes};
pub use task::{PackageTask, TaskHasher};
