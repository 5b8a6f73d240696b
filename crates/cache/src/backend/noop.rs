use super::{CacheBackend, CacheHit, ItemStatus};
use crate::Result;
use strata_paths::{AbsolutePath, AnchoredUnixPath};

/// Backend used when caching is disabled: writes vanish, reads miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl CacheBackend for NoopCache {
    fn put(
        &self,
        _anchor: &AbsolutePath,
        _key: &str,
        _duration_ms: u64,
        _files: &[AnchoredUnixPath],
    ) -> Result<()> {
        Ok(())
    }

    fn fetch(&self, _anchor: &AbsolutePath, _key: &str) -> Result<Option<CacheHit>> {
        Ok(None)
    }

    fn exists(&self, _key: &str) -> Result<ItemStatus> {
        Ok(ItemStatus::default())
    }

    fn clean(&self, _anchor: &AbsolutePath) -> Result<()> {
        Ok(())
    }

    fn clean_all(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) {}
}
