use super::{CacheBackend, CacheHit, CacheSource, ItemStatus, validate_key};
use crate::item::{create_archive, restore_archive};
use crate::{Error, Result};
use strata_paths::{AbsolutePath, AnchoredUnixPath};

/// A cache item as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    /// The compressed archive
    pub bytes: Vec<u8>,
    /// Original task duration in milliseconds
    pub duration_ms: u64,
}

/// Moves whole archives to and from a remote store.
///
/// The transport only sees opaque blobs; archiving and hardened restore stay
/// in [`RemoteCache`].
pub trait RemoteTransport: Send + Sync {
    /// Store `bytes` under `key`.
    fn upload(&self, key: &str, duration_ms: u64, bytes: Vec<u8>) -> Result<()>;

    /// Fetch the blob for `key`, `None` if absent.
    fn download(&self, key: &str) -> Result<Option<RemoteArtifact>>;

    /// Whether `key` is stored.
    fn exists(&self, key: &str) -> Result<bool>;
}

/// Backend that archives in memory and ships blobs through a transport.
#[derive(Debug)]
pub struct RemoteCache<T> {
    transport: T,
}

impl<T: RemoteTransport> RemoteCache<T> {
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: RemoteTransport> CacheBackend for RemoteCache<T> {
    fn put(
        &self,
        anchor: &AbsolutePath,
        key: &str,
        duration_ms: u64,
        files: &[AnchoredUnixPath],
    ) -> Result<()> {
        validate_key(key)?;
        let _span = tracing::debug_span!("remote_cache.put", key = %key).entered();
        let blob = create_archive(anchor, files)?;
        tracing::debug!(key = %key, bytes = blob.len(), "Uploading cache item");
        self.transport.upload(key, duration_ms, blob)
    }

    fn fetch(&self, anchor: &AbsolutePath, key: &str) -> Result<Option<CacheHit>> {
        validate_key(key)?;
        let _span = tracing::debug_span!("remote_cache.fetch", key = %key).entered();
        let Some(artifact) = self.transport.download(key)? else {
            tracing::debug!(key = %key, "Remote cache miss");
            return Ok(None);
        };
        let files =
            restore_archive(&artifact.bytes, anchor).map_err(|e| Error::restore_failed(key, e))?;
        Ok(Some(CacheHit {
            files,
            duration_ms: artifact.duration_ms,
            source: CacheSource::Remote,
        }))
    }

    fn exists(&self, key: &str) -> Result<ItemStatus> {
        validate_key(key)?;
        Ok(ItemStatus {
            local: false,
            remote: self.transport.exists(key)?,
        })
    }

    fn clean(&self, _anchor: &AbsolutePath) -> Result<()> {
        // Remote entries are shared across checkouts; never cleaned from here
        Ok(())
    }

    fn clean_all(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) {
        tracing::debug!("Remote cache shut down");
    }
}
