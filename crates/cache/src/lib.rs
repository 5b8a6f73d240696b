//! Cache items and the backends that store them.
//!
//! A cache item is a zstd-compressed tar of a task's outputs. Writing is
//! deterministic: entries keep the order they were given in and carry no
//! timestamps or ownership. Restoring treats the archive as hostile. Entry
//! names are canonicalized lexically, ancestors are created one segment at a
//! time, symlinks are only traversed when they stay under the restore
//! directory, and leaves are opened without following links.
//!
//! Backends ([`backend::FsCache`], [`backend::RemoteCache`],
//! [`backend::NoopCache`]) share the [`backend::CacheBackend`] contract and
//! can be stacked with a [`backend::CacheMultiplexer`].

mod error;

pub mod backend;
pub mod item;

pub use backend::{
    CacheBackend, CacheHit, CacheMultiplexer, CacheOpts, CacheSource, FsCache, ItemStatus,
    NoopCache, PutPolicy, RemoteArtifact, RemoteCache, RemoteTransport, new_cache, validate_key,
};
pub use error::{Error, Result};
pub use item::{CacheReader, CacheWriter, create_archive, restore_archive};
