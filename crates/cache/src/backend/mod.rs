//! Storage backends.
//!
//! Every backend maps a cache key to one cache item plus its duration. A fetch
//! either restores a complete item or reports a miss; it never exposes a
//! partially written entry.

mod local;
mod multiplex;
mod noop;
mod remote;

pub use local::FsCache;
pub use multiplex::{CacheMultiplexer, PutPolicy};
pub use noop::NoopCache;
pub use remote::{RemoteArtifact, RemoteCache, RemoteTransport};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use strata_paths::{AbsolutePath, AnchoredPath, AnchoredUnixPath};

/// Where a hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// Local disk
    Local,
    /// Remote cache
    Remote,
}

/// A successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    /// Restored paths, relative to the anchor
    pub files: Vec<AnchoredPath>,
    /// Original task duration in milliseconds
    pub duration_ms: u64,
    /// Backend that served the hit
    pub source: CacheSource,
}

/// Presence of a key in each kind of backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatus {
    /// Present on local disk
    pub local: bool,
    /// Present in the remote cache
    pub remote: bool,
}

impl ItemStatus {
    /// Present anywhere.
    #[must_use]
    pub fn exists(self) -> bool {
        self.local || self.remote
    }

    /// Combine the status of two backends.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            local: self.local || other.local,
            remote: self.remote || other.remote,
        }
    }
}

/// The storage contract shared by every backend.
///
/// Backends are synchronous and called from worker threads, so they must be
/// shareable across threads.
pub trait CacheBackend: Send + Sync {
    /// Archive `files` (relative to `anchor`) under `key`.
    fn put(
        &self,
        anchor: &AbsolutePath,
        key: &str,
        duration_ms: u64,
        files: &[AnchoredUnixPath],
    ) -> Result<()>;

    /// Restore the item for `key` under `anchor`; `None` on a miss.
    fn fetch(&self, anchor: &AbsolutePath, key: &str) -> Result<Option<CacheHit>>;

    /// Check for `key` without restoring it.
    fn exists(&self, key: &str) -> Result<ItemStatus>;

    /// Remove entries that were stored from `anchor`.
    fn clean(&self, anchor: &AbsolutePath) -> Result<()>;

    /// Remove every entry.
    fn clean_all(&self) -> Result<()>;

    /// Flush and release resources.
    fn shutdown(&self);
}

/// Keys become file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(Error::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Which backends to build.
#[derive(Debug, Clone)]
pub struct CacheOpts {
    /// Local cache directory
    pub dir: AbsolutePath,
    /// Disable the local cache
    pub skip_filesystem: bool,
    /// Disable the remote cache
    pub skip_remote: bool,
    /// Whether a failed put is an error
    pub put_policy: PutPolicy,
}

/// Build the backend described by `opts`.
///
/// With nothing enabled this is a [`NoopCache`]. Otherwise the backends sit
/// behind a [`CacheMultiplexer`], local disk first, even when only one is
/// enabled: the multiplexer is what turns fetch errors into misses and
/// applies the put policy.
pub fn new_cache(
    opts: &CacheOpts,
    remote: Option<Box<dyn CacheBackend>>,
) -> Result<Box<dyn CacheBackend>> {
    let mut caches: Vec<Box<dyn CacheBackend>> = Vec::new();
    if !opts.skip_filesystem {
        caches.push(Box::new(FsCache::new(opts.dir.clone())?));
    }
    if !opts.skip_remote
        && let Some(remote) = remote
    {
        caches.push(remote);
    }

    tracing::debug!(backends = caches.len(), "Configured cache backends");
    if caches.is_empty() {
        return Ok(Box::new(NoopCache));
    }
    Ok(Box::new(CacheMultiplexer::new(caches, opts.put_policy)))
}
