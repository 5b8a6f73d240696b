//! The cache item: a zstd-compressed tar of a task's outputs.
//!
//! Writing is straightforward. Restoring treats the archive as hostile: entry
//! names are canonicalized lexically, ancestors are created one segment at a
//! time, and symlinks are never written through.

mod create;
mod dir_tree;
mod name;
mod restore;

pub use create::{CacheWriter, create_archive};
pub use restore::{CacheReader, restore_archive};
