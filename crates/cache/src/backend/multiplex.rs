use super::{CacheBackend, CacheHit, ItemStatus};
use crate::Result;
use strata_paths::{AbsolutePath, AnchoredUnixPath};

/// What a failed put means for the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PutPolicy {
    /// Log and carry on; a missed store only costs a future rebuild
    #[default]
    BestEffort,
    /// Report the first failure
    Required,
}

/// Fans operations out over several backends, in priority order.
///
/// Fetch returns the first hit and copies it into every earlier backend that
/// missed. Backend errors during fetch are logged and treated as misses; a
/// restore that failed after writing into the anchor ends the fetch, since
/// later backends would restore over partial output. Put failures only reach
/// the caller under [`PutPolicy::Required`].
///
/// [`super::new_cache`] wraps even a single backend in a multiplexer so these
/// rules hold for every configuration.
pub struct CacheMultiplexer {
    caches: Vec<Box<dyn CacheBackend>>,
    put_policy: PutPolicy,
}

impl std::fmt::Debug for CacheMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMultiplexer")
            .field("caches", &self.caches.len())
            .field("put_policy", &self.put_policy)
            .finish()
    }
}

impl CacheMultiplexer {
    /// Combine `caches`; earlier entries are consulted first.
    #[must_use]
    pub fn new(caches: Vec<Box<dyn CacheBackend>>, put_policy: PutPolicy) -> Self {
        Self { caches, put_policy }
    }

    fn backfill(&self, missed: &[usize], anchor: &AbsolutePath, key: &str, hit: &CacheHit) {
        if missed.is_empty() {
            return;
        }
        let files: Vec<AnchoredUnixPath> = match hit.files.iter().map(|p| p.to_unix()).collect() {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cannot backfill cache hit");
                return;
            }
        };
        for &index in missed {
            if let Err(e) = self.caches[index].put(anchor, key, hit.duration_ms, &files) {
                tracing::warn!(key = %key, backend = index, error = %e, "Cache backfill failed");
            }
        }
    }
}

impl CacheBackend for CacheMultiplexer {
    fn put(
        &self,
        anchor: &AbsolutePath,
        key: &str,
        duration_ms: u64,
        files: &[AnchoredUnixPath],
    ) -> Result<()> {
        let mut first_error = None;
        for (index, cache) in self.caches.iter().enumerate() {
            if let Err(e) = cache.put(anchor, key, duration_ms, files) {
                tracing::warn!(key = %key, backend = index, error = %e, "Cache put failed");
                first_error.get_or_insert(e);
            }
        }
        match (first_error, self.put_policy) {
            (Some(e), PutPolicy::Required) => Err(e),
            _ => Ok(()),
        }
    }

    fn fetch(&self, anchor: &AbsolutePath, key: &str) -> Result<Option<CacheHit>> {
        let mut missed = Vec::new();
        for (index, cache) in self.caches.iter().enumerate() {
            match cache.fetch(anchor, key) {
                Ok(Some(hit)) => {
                    self.backfill(&missed, anchor, key, &hit);
                    return Ok(Some(hit));
                }
                Ok(None) => missed.push(index),
                Err(e) if e.touched_anchor() => {
                    // Restoring another copy over a half-written one would
                    // mix the two
                    tracing::warn!(key = %key, backend = index, anchor = %anchor, error = %e, "Cache restore failed partway, treating as miss");
                    return Ok(None);
                }
                Err(e) => {
                    tracing::warn!(key = %key, backend = index, error = %e, "Cache fetch failed, treating as miss");
                    missed.push(index);
                }
            }
        }
        Ok(None)
    }

    fn exists(&self, key: &str) -> Result<ItemStatus> {
        let mut status = ItemStatus::default();
        for (index, cache) in self.caches.iter().enumerate() {
            match cache.exists(key) {
                Ok(found) => status = status.merge(found),
                Err(e) => {
                    tracing::warn!(key = %key, backend = index, error = %e, "Cache exists check failed");
                }
            }
        }
        Ok(status)
    }

    fn clean(&self, anchor: &AbsolutePath) -> Result<()> {
        for cache in &self.caches {
            cache.clean(anchor)?;
        }
        Ok(())
    }

    fn clean_all(&self) -> Result<()> {
        for cache in &self.caches {
            cache.clean_all()?;
        }
        Ok(())
    }

    fn shutdown(&self) {
        for cache in &self.caches {
            cache.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::remote::memory::MemoryTransport;
    use crate::backend::{CacheSource, FsCache, RemoteCache};
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    /// Shares one transport between the multiplexer and the test.
    struct Shared(Arc<MemoryTransport>);

    impl crate::backend::RemoteTransport for Shared {
        fn upload(&self, key: &str, duration_ms: u64, bytes: Vec<u8>) -> Result<()> {
            self.0.upload(key, duration_ms, bytes)
        }
        fn download(&self, key: &str) -> Result<Option<crate::backend::RemoteArtifact>> {
            self.0.download(key)
        }
        fn exists(&self, key: &str) -> Result<bool> {
            self.0.exists(key)
        }
    }

    struct Fixture {
        tmp: TempDir,
        transport: Arc<MemoryTransport>,
        src: AbsolutePath,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            fs::create_dir(tmp.path().join("src")).unwrap();
            fs::write(tmp.path().join("src/out.txt"), b"payload").unwrap();
            Self {
                src: AbsolutePath::new(tmp.path().join("src")).unwrap(),
                transport: Arc::new(MemoryTransport::default()),
                tmp,
            }
        }

        fn multiplexer(&self, policy: PutPolicy) -> CacheMultiplexer {
            let local = FsCache::new(AbsolutePath::new(self.tmp.path().join("cache")).unwrap()).unwrap();
            let remote = RemoteCache::new(Shared(Arc::clone(&self.transport)));
            CacheMultiplexer::new(vec![Box::new(local), Box::new(remote)], policy)
        }

        fn dst(&self, name: &str) -> AbsolutePath {
            AbsolutePath::new(self.tmp.path().join(name)).unwrap()
        }
    }

    fn outputs() -> Vec<AnchoredUnixPath> {
        vec![AnchoredUnixPath::new("out.txt").unwrap()]
    }

    #[test]
    fn test_put_reaches_every_backend() {
        let f = Fixture::new();
        let cache = f.multiplexer(PutPolicy::BestEffort);
        cache.put(&f.src, "k", 5, &outputs()).unwrap();
        assert_eq!(
            cache.exists("k").unwrap(),
            ItemStatus { local: true, remote: true }
        );
    }

    #[test]
    fn test_remote_hit_backfills_local() {
        let f = Fixture::new();
        // Seed only the remote
        RemoteCache::new(Shared(Arc::clone(&f.transport)))
            .put(&f.src, "k", 5, &outputs())
            .unwrap();

        let cache = f.multiplexer(PutPolicy::BestEffort);
        let dst = f.dst("dst");
        let hit = cache.fetch(&dst, "k").unwrap().unwrap();
        assert_eq!(hit.source, CacheSource::Remote);
        assert!(cache.exists("k").unwrap().local);

        let again = cache.fetch(&f.dst("dst2"), "k").unwrap().unwrap();
        assert_eq!(again.source, CacheSource::Local);
        assert_eq!(again.duration_ms, 5);
    }

    #[test]
    fn test_failing_backend_is_a_miss() {
        let f = Fixture::new();
        f.transport.fail.store(true, Ordering::SeqCst);
        let cache = f.multiplexer(PutPolicy::BestEffort);
        assert!(cache.fetch(&f.dst("dst"), "k").unwrap().is_none());
    }

    #[test]
    fn test_partial_local_restore_does_not_fall_through() {
        let f = Fixture::new();
        let cache = f.multiplexer(PutPolicy::BestEffort);
        cache.put(&f.src, "k", 5, &outputs()).unwrap();

        // Cut the local archive short; the remote copy stays healthy
        let archive = f.tmp.path().join("cache/k.tar.zst");
        let bytes = fs::read(&archive).unwrap();
        fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

        assert!(cache.fetch(&f.dst("dst"), "k").unwrap().is_none());
        // A fresh anchor is still served by the remote copy once local is gone
        fs::remove_file(f.tmp.path().join("cache/k-meta.json")).unwrap();
        let hit = cache.fetch(&f.dst("fresh"), "k").unwrap().unwrap();
        assert_eq!(hit.source, CacheSource::Remote);
    }

    #[test]
    fn test_unreadable_local_meta_falls_through() {
        let f = Fixture::new();
        let cache = f.multiplexer(PutPolicy::BestEffort);
        cache.put(&f.src, "k", 5, &outputs()).unwrap();
        fs::write(f.tmp.path().join("cache/k-meta.json"), b"{garbage").unwrap();

        let hit = cache.fetch(&f.dst("dst"), "k").unwrap().unwrap();
        assert_eq!(hit.source, CacheSource::Remote);
    }

    #[test]
    fn test_put_policy() {
        let f = Fixture::new();
        f.transport.fail.store(true, Ordering::SeqCst);
        assert!(f.multiplexer(PutPolicy::BestEffort).put(&f.src, "k", 1, &outputs()).is_ok());
        assert!(f.multiplexer(PutPolicy::Required).put(&f.src, "k", 1, &outputs()).is_err());
    }
}
