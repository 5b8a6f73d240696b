use super::{CacheBackend, CacheHit, CacheSource, ItemStatus, validate_key};
use crate::item::{CacheReader, CacheWriter};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use strata_paths::{AbsolutePath, AnchoredUnixPath};

const ARCHIVE_SUFFIX: &str = ".tar.zst";
const META_SUFFIX: &str = "-meta.json";
const TMP_SUFFIX: &str = ".tmp";

/// Sidecar written next to each archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheMetadata {
    hash: String,
    duration: u64,
    anchor: PathBuf,
}

/// Cache items on local disk.
///
/// Each key is stored as `<key>.tar.zst` plus `<key>-meta.json`. Both are
/// written to temporary files and renamed into place, the metadata last, so
/// a reader that finds the metadata also finds a complete archive.
#[derive(Debug, Clone)]
pub struct FsCache {
    dir: AbsolutePath,
}

impl FsCache {
    /// Open (and create) a cache directory.
    pub fn new(dir: AbsolutePath) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;
        Ok(Self { dir })
    }

    /// The cache directory.
    #[must_use]
    pub fn dir(&self) -> &AbsolutePath {
        &self.dir
    }

    fn archive_path(&self, key: &str) -> PathBuf {
        self.dir.as_path().join(format!("{key}{ARCHIVE_SUFFIX}"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.as_path().join(format!("{key}{META_SUFFIX}"))
    }

    fn tmp_path(&self, name: &str) -> PathBuf {
        self.dir
            .as_path()
            .join(format!(".{name}.{}{TMP_SUFFIX}", uuid::Uuid::new_v4()))
    }

    fn read_meta(path: &Path) -> Result<Option<CacheMetadata>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(e, path, "read")),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::serialization(format!("{}: {e}", path.display())))
    }

    fn write_archive(
        &self,
        anchor: &AbsolutePath,
        key: &str,
        files: &[AnchoredUnixPath],
    ) -> Result<()> {
        let tmp = self.tmp_path(key);
        let result = (|| {
            let file = fs::File::create(&tmp).map_err(|e| Error::io(e, &tmp, "create"))?;
            let mut writer = CacheWriter::new(BufWriter::new(file))?;
            for path in files {
                writer.add_file(anchor, path)?;
            }
            let buffered = writer.finish()?;
            let file = buffered
                .into_inner()
                .map_err(|e| Error::io(e.into_error(), &tmp, "flush"))?;
            file.sync_all().map_err(|e| Error::io(e, &tmp, "sync"))?;
            let target = self.archive_path(key);
            fs::rename(&tmp, &target).map_err(|e| Error::io(e, &target, "rename"))
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn write_meta(&self, key: &str, meta: &CacheMetadata) -> Result<()> {
        let tmp = self.tmp_path(&format!("{key}-meta"));
        let bytes = serde_json::to_vec_pretty(meta)
            .map_err(|e| Error::serialization(e.to_string()))?;
        let result = (|| {
            let mut file = fs::File::create(&tmp).map_err(|e| Error::io(e, &tmp, "create"))?;
            file.write_all(&bytes)
                .map_err(|e| Error::io(e, &tmp, "write"))?;
            file.sync_all().map_err(|e| Error::io(e, &tmp, "sync"))?;
            let target = self.meta_path(key);
            fs::rename(&tmp, &target).map_err(|e| Error::io(e, &target, "rename"))
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn remove_entry(&self, key: &str) -> Result<()> {
        // Metadata first, so the key reads as a miss before the archive goes
        for path in [self.meta_path(key), self.archive_path(key)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(e, &path, "remove_file")),
            }
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let dir = self.dir.as_path();
        let mut keys = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| Error::io(e, dir, "read_dir"))? {
            let entry = entry.map_err(|e| Error::io(e, dir, "read_dir"))?;
            if let Some(key) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(META_SUFFIX))
            {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }
}

impl CacheBackend for FsCache {
    fn put(
        &self,
        anchor: &AbsolutePath,
        key: &str,
        duration_ms: u64,
        files: &[AnchoredUnixPath],
    ) -> Result<()> {
        validate_key(key)?;
        let _span = tracing::debug_span!("fs_cache.put", key = %key, files = files.len()).entered();
        self.write_archive(anchor, key, files)?;
        self.write_meta(
            key,
            &CacheMetadata {
                hash: key.to_string(),
                duration: duration_ms,
                anchor: anchor.as_path().to_path_buf(),
            },
        )?;
        tracing::debug!(key = %key, "Stored cache entry");
        Ok(())
    }

    fn fetch(&self, anchor: &AbsolutePath, key: &str) -> Result<Option<CacheHit>> {
        validate_key(key)?;
        let _span = tracing::debug_span!("fs_cache.fetch", key = %key).entered();
        let Some(meta) = Self::read_meta(&self.meta_path(key))? else {
            tracing::debug!(key = %key, "Local cache miss");
            return Ok(None);
        };

        let archive_path = self.archive_path(key);
        let file = match fs::File::open(&archive_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Cleaned between reading metadata and opening the archive
                tracing::debug!(key = %key, "Local cache entry vanished");
                return Ok(None);
            }
            Err(e) => return Err(Error::io(e, &archive_path, "open")),
        };
        let files = CacheReader::new(BufReader::new(file))?
            .restore(anchor)
            .map_err(|e| Error::restore_failed(key, e))?;
        tracing::debug!(key = %key, files = files.len(), "Local cache hit");
        Ok(Some(CacheHit {
            files,
            duration_ms: meta.duration,
            source: CacheSource::Local,
        }))
    }

    fn exists(&self, key: &str) -> Result<ItemStatus> {
        validate_key(key)?;
        Ok(ItemStatus {
            local: self.meta_path(key).is_file(),
            remote: false,
        })
    }

    fn clean(&self, anchor: &AbsolutePath) -> Result<()> {
        let mut removed = 0usize;
        for key in self.keys()? {
            match Self::read_meta(&self.meta_path(&key)) {
                Ok(Some(meta)) if meta.anchor == anchor.as_path() => {
                    self.remove_entry(&key)?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping unreadable cache metadata");
                }
            }
        }
        tracing::info!(anchor = %anchor, removed, "Cleaned local cache entries");
        Ok(())
    }

    fn clean_all(&self) -> Result<()> {
        let dir = self.dir.as_path();
        let mut removed = 0usize;
        for entry in fs::read_dir(dir).map_err(|e| Error::io(e, dir, "read_dir"))? {
            let entry = entry.map_err(|e| Error::io(e, dir, "read_dir"))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(ARCHIVE_SUFFIX) || name.ends_with(META_SUFFIX) || name.ends_with(TMP_SUFFIX) {
                let path = entry.path();
                fs::remove_file(&path).map_err(|e| Error::io(e, &path, "remove_file"))?;
                removed += 1;
            }
        }
        tracing::info!(dir = %self.dir, removed, "Cleaned all local cache files");
        Ok(())
    }

    fn shutdown(&self) {
        tracing::debug!(dir = %self.dir, "Local cache shut down");
    }
}
