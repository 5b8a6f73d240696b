use super::dir_tree::CachedDirTree;
use super::name::canonicalize_name;
use crate::{Error, Result};
use std::fs;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use strata_paths::{AbsolutePath, AnchoredPath};

/// Reads a cache item and restores it under an anchor.
///
/// Every entry name is canonicalized and every ancestor directory is
/// verified to stay inside the anchor before anything is written. The first
/// failure aborts the restore; files written so far are left in place and the
/// destination should be treated as contaminated.
pub struct CacheReader<R: Read> {
    archive: tar::Archive<zstd::Decoder<'static, BufReader<R>>>,
}

impl<R: Read> CacheReader<R> {
    /// Open a cache item stream.
    pub fn new(inner: R) -> Result<Self> {
        let decoder = zstd::Decoder::new(inner).map_err(|e| Error::archive_read(&e))?;
        Ok(Self {
            archive: tar::Archive::new(decoder),
        })
    }

    /// Restore every entry under `anchor`, returning the restored paths in
    /// archive order.
    pub fn restore(mut self, anchor: &AbsolutePath) -> Result<Vec<AnchoredPath>> {
        let _span = tracing::debug_span!("restore", anchor = %anchor).entered();

        fs::create_dir_all(anchor).map_err(|e| Error::io(e, anchor, "create_dir_all"))?;
        let real_anchor =
            fs::canonicalize(anchor).map_err(|e| Error::io(e, anchor, "canonicalize"))?;
        let mut tree = CachedDirTree::new(real_anchor);

        let mut restored = Vec::new();
        let entries = self.archive.entries().map_err(|e| Error::archive_read(&e))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| Error::archive_read(&e))?;
            let path = restore_entry(&mut tree, &mut entry)?;
            restored.push(path);
        }
        tracing::debug!(entries = restored.len(), "Restored cache item");
        Ok(restored)
    }
}

/// Restore an in-memory cache item.
pub fn restore_archive(blob: &[u8], anchor: &AbsolutePath) -> Result<Vec<AnchoredPath>> {
    CacheReader::new(blob)?.restore(anchor)
}

fn restore_entry<R: Read>(
    tree: &mut CachedDirTree,
    entry: &mut tar::Entry<'_, R>,
) -> Result<AnchoredPath> {
    let raw_name = entry.path_bytes().into_owned();
    let name = canonicalize_name(&raw_name)?;
    let header = entry.header();
    let entry_type = header.entry_type();
    let mode = header.mode().map_err(|e| Error::archive_read(&e))?;

    match entry_type {
        tar::EntryType::Directory => {
            tree.safe_mkdir_all(&name.path, mode)?;
        }
        tar::EntryType::Regular | tar::EntryType::Continuous => {
            reject_root(&name.path, &raw_name)?;
            restore_regular(tree, &name.path, mode, entry)?;
        }
        tar::EntryType::Symlink => {
            reject_root(&name.path, &raw_name)?;
            let target = entry
                .link_name_bytes()
                .ok_or_else(|| Error::MalformedName {
                    name: String::from_utf8_lossy(&raw_name).into_owned(),
                })?
                .into_owned();
            restore_symlink(tree, &name.path, &target)?;
        }
        other => {
            return Err(Error::UnsupportedFileType {
                name: String::from_utf8_lossy(&raw_name).into_owned(),
                kind: format!("{other:?}"),
            });
        }
    }
    tracing::trace!(path = %name.path, kind = ?entry_type, "Restored entry");
    Ok(name.path)
}

/// Only directories may name the anchor itself.
fn reject_root(path: &AnchoredPath, raw_name: &[u8]) -> Result<()> {
    if path.is_root() {
        return Err(Error::MalformedName {
            name: String::from_utf8_lossy(raw_name).into_owned(),
        });
    }
    Ok(())
}

/// Verify the parent and return the real location for `path`.
fn prepare_leaf(tree: &mut CachedDirTree, path: &AnchoredPath) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or_default();
    let real_parent = tree.safe_mkdir_all(&parent, 0o755)?;
    let file_name = path.file_name().ok_or_else(|| Error::MalformedName {
        name: path.to_string(),
    })?;
    Ok(real_parent.join(file_name))
}

fn restore_regular<R: Read>(
    tree: &mut CachedDirTree,
    path: &AnchoredPath,
    mode: u32,
    reader: &mut R,
) -> Result<()> {
    let location = prepare_leaf(tree, path)?;

    // Never write through a link left at the leaf
    if let Ok(meta) = fs::symlink_metadata(&location)
        && meta.file_type().is_symlink()
    {
        fs::remove_file(&location).map_err(|e| Error::io(e, &location, "remove symlink"))?;
    }

    let mut file = open_for_restore(&location, mode)?;
    let mut buf = [0u8; 1024 * 64];
    loop {
        let n = reader.read(&mut buf).map_err(|e| Error::archive_read(&e))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .map_err(|e| Error::io(e, &location, "write"))?;
    }
    drop(file);
    set_mode(&location, mode)
}

#[cfg(unix)]
fn open_for_restore(location: &Path, mode: u32) -> Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .custom_flags(libc::O_NOFOLLOW)
        .open(location)
        .map_err(|e| Error::io(e, location, "open"))
}

#[cfg(not(unix))]
fn open_for_restore(location: &Path, _mode: u32) -> Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(location)
        .map_err(|e| Error::io(e, location, "open"))
}

#[cfg(unix)]
fn set_mode(location: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(location, fs::Permissions::from_mode(mode))
        .map_err(|e| Error::io(e, location, "chmod"))
}

#[cfg(not(unix))]
fn set_mode(location: &Path, mode: u32) -> Result<()> {
    let mut permissions = fs::metadata(location)
        .map_err(|e| Error::io(e, location, "stat"))?
        .permissions();
    permissions.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(location, permissions).map_err(|e| Error::io(e, location, "chmod"))
}

fn restore_symlink(tree: &mut CachedDirTree, path: &AnchoredPath, target: &[u8]) -> Result<()> {
    let location = prepare_leaf(tree, path)?;
    let target = link_target(target, path)?;

    match fs::symlink_metadata(&location) {
        Ok(meta) if meta.is_dir() => {
            // Only an empty directory may be replaced
            fs::remove_dir(&location).map_err(|e| Error::io(e, &location, "remove_dir"))?;
        }
        Ok(_) => {
            fs::remove_file(&location).map_err(|e| Error::io(e, &location, "remove_file"))?;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io(e, &location, "lstat")),
    }

    create_symlink(&target, &location)
}

#[cfg(unix)]
fn link_target(raw: &[u8], _path: &AnchoredPath) -> Result<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    Ok(PathBuf::from(std::ffi::OsStr::from_bytes(raw)))
}

#[cfg(not(unix))]
fn link_target(raw: &[u8], path: &AnchoredPath) -> Result<PathBuf> {
    let target = std::str::from_utf8(raw).map_err(|_| Error::MalformedName {
        name: path.to_string(),
    })?;
    Ok(PathBuf::from(target.replace('/', "\\")))
}

#[cfg(unix)]
fn create_symlink(target: &Path, location: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, location).map_err(|e| Error::io(e, location, "symlink"))
}

#[cfg(windows)]
fn create_symlink(target: &Path, location: &Path) -> Result<()> {
    let resolved = location.parent().map(|p| p.join(target));
    let result = if resolved.is_some_and(|p| p.is_dir()) {
        std::os::windows::fs::symlink_dir(target, location)
    } else {
        std::os::windows::fs::symlink_file(target, location)
    };
    result.map_err(|e| Error::io(e, location, "symlink"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::create_archive;
    use std::io;
    use strata_paths::AnchoredUnixPath;
    use tempfile::TempDir;

    type RawEntry = (String, tar::EntryType, Vec<u8>);

    fn dir(name: &str) -> RawEntry {
        (name.to_string(), tar::EntryType::Directory, Vec::new())
    }

    fn file(name: &str, data: &[u8]) -> RawEntry {
        (name.to_string(), tar::EntryType::Regular, data.to_vec())
    }

    fn link(name: &str, target: &str) -> RawEntry {
        (name.to_string(), tar::EntryType::Symlink, target.as_bytes().to_vec())
    }

    /// Build an archive with raw, unvalidated entry names.
    fn raw_archive(entries: &[RawEntry]) -> Vec<u8> {
        let encoder = zstd::Encoder::new(Vec::new(), 3).unwrap();
        let mut builder = tar::Builder::new(encoder);
        for (name, kind, data) in entries {
            let mut header = tar::Header::new_gnu();
            let field = &mut header.as_old_mut().name;
            field[..name.len()].copy_from_slice(name.as_bytes());
            header.set_entry_type(*kind);
            header.set_mode(0o644);
            if *kind == tar::EntryType::Symlink {
                header
                    .set_link_name(std::str::from_utf8(data).unwrap())
                    .unwrap();
                header.set_size(0);
                header.set_cksum();
                builder.append(&header, io::empty()).unwrap();
            } else {
                header.set_size(data.len() as u64);
                header.set_cksum();
                builder.append(&header, data.as_slice()).unwrap();
            }
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn anchor() -> (TempDir, AbsolutePath) {
        let dir = TempDir::new().unwrap();
        let root = AbsolutePath::new(dir.path()).unwrap();
        (dir, root)
    }

    fn outside_target(dir: &TempDir) -> String {
        dir.path().to_str().unwrap().to_string()
    }

    #[test]
    fn test_restore_files_and_dirs() {
        let (_dir, root) = anchor();
        let blob = raw_archive(&[
            dir("dist/"),
            file("dist/a.txt", b"hello"),
            dir("dist/empty/"),
        ]);
        let restored = restore_archive(&blob, &root).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(fs::read(root.as_path().join("dist/a.txt")).unwrap(), b"hello");
        assert!(root.as_path().join("dist/empty").is_dir());
    }

    #[test]
    fn test_missing_parents_created() {
        let (_dir, root) = anchor();
        let blob = raw_archive(&[file("deep/er/file", b"x")]);
        restore_archive(&blob, &root).unwrap();
        assert!(root.as_path().join("deep/er/file").is_file());
    }

    #[test]
    fn test_existing_file_truncated() {
        let (_dir, root) = anchor();
        fs::write(root.as_path().join("out.txt"), b"a much longer previous body").unwrap();
        let blob = raw_archive(&[file("out.txt", b"short")]);
        restore_archive(&blob, &root).unwrap();
        assert_eq!(fs::read(root.as_path().join("out.txt")).unwrap(), b"short");
    }

    #[test]
    fn test_parent_traversal_rejected() {
        let (_dir, root) = anchor();
        let blob = raw_archive(&[file("../escape", b"x")]);
        let err = restore_archive(&blob, &root).unwrap_err();
        assert!(matches!(err, Error::PathEscapesAnchor { .. }));
    }

    #[test]
    fn test_absolute_name_rejected() {
        let (_dir, root) = anchor();
        let blob = raw_archive(&[file("/tmp/escape", b"x")]);
        assert!(matches!(
            restore_archive(&blob, &root).unwrap_err(),
            Error::AbsoluteName { .. }
        ));
    }

    #[test]
    fn test_dot_dot_inside_anchor_is_fine() {
        let (_dir, root) = anchor();
        let blob = raw_archive(&[file("a/../b.txt", b"x")]);
        let restored = restore_archive(&blob, &root).unwrap();
        assert_eq!(restored, vec![AnchoredPath::new("b.txt").unwrap()]);
    }

    #[test]
    fn test_file_named_like_anchor_rejected() {
        let (_dir, root) = anchor();
        let blob = raw_archive(&[file("./", b"x")]);
        assert!(matches!(
            restore_archive(&blob, &root).unwrap_err(),
            Error::MalformedName { .. }
        ));
    }

    #[test]
    fn test_unsupported_entry_type() {
        let (_dir, root) = anchor();
        let blob = raw_archive(&[("pipe".to_string(), tar::EntryType::Fifo, Vec::new())]);
        assert!(matches!(
            restore_archive(&blob, &root).unwrap_err(),
            Error::UnsupportedFileType { .. }
        ));
    }

    #[test]
    fn test_truncated_archive() {
        let (_dir, root) = anchor();
        let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        let blob = raw_archive(&[file("a.bin", &payload)]);
        let truncated = &blob[..blob.len() / 2];
        let err = restore_archive(truncated, &root).unwrap_err();
        assert!(err.is_integrity_error(), "{err:?}");
    }

    #[test]
    fn test_garbage_is_not_a_cache_item() {
        let (_dir, root) = anchor();
        let err = restore_archive(b"definitely not zstd", &root).unwrap_err();
        assert!(err.is_integrity_error(), "{err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_then_file_through_it_rejected() {
        let (_dir, root) = anchor();
        let outside = TempDir::new().unwrap();
        let blob = raw_archive(&[
            link("link", &outside_target(&outside)),
            file("link/passwd", b"owned"),
        ]);
        let err = restore_archive(&blob, &root).unwrap_err();
        assert!(matches!(err, Error::SymlinkEscapesAnchor { .. }));
        assert!(!outside.path().join("passwd").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_cached_dir_replaced_by_symlink_rejected() {
        // `dir/sub` is created and cached, then swapped for an escaping
        // symlink; the next entry below it must be validated again
        let (_dir, root) = anchor();
        let outside = TempDir::new().unwrap();
        let blob = raw_archive(&[
            dir("dir/"),
            dir("dir/sub/"),
            link("dir/sub", &outside_target(&outside)),
            file("dir/sub/evil", b"owned"),
        ]);
        let err = restore_archive(&blob, &root).unwrap_err();
        assert!(matches!(err, Error::SymlinkEscapesAnchor { .. }));
        assert!(!outside.path().join("evil").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_contained_symlink_parent_allowed() {
        let (_dir, root) = anchor();
        let blob = raw_archive(&[
            dir("real/"),
            link("alias", "real"),
            file("alias/file", b"ok"),
        ]);
        restore_archive(&blob, &root).unwrap();
        assert_eq!(fs::read(root.as_path().join("real/file")).unwrap(), b"ok");
    }

    #[cfg(unix)]
    #[test]
    fn test_file_overwrites_leaf_symlink_instead_of_following() {
        let (_dir, root) = anchor();
        let outside = TempDir::new().unwrap();
        let victim = outside.path().join("victim");
        fs::write(&victim, b"original").unwrap();
        std::os::unix::fs::symlink(&victim, root.as_path().join("out")).unwrap();

        let blob = raw_archive(&[file("out", b"new")]);
        restore_archive(&blob, &root).unwrap();
        assert_eq!(fs::read(&victim).unwrap(), b"original");
        assert_eq!(fs::read(root.as_path().join("out")).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_replaces_non_empty_dir_fails() {
        let (_dir, root) = anchor();
        let blob = raw_archive(&[dir("d/"), file("d/f", b"x"), link("d", "elsewhere")]);
        assert!(matches!(
            restore_archive(&blob, &root).unwrap_err(),
            Error::Io { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_round_trip_preserves_mode_and_links() {
        use std::os::unix::fs::PermissionsExt;

        let (src_dir, src) = anchor();
        fs::create_dir_all(src_dir.path().join("bin")).unwrap();
        fs::write(src_dir.path().join("bin/run"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(
            src_dir.path().join("bin/run"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();
        std::os::unix::fs::symlink("run", src_dir.path().join("bin/start")).unwrap();

        let files: Vec<AnchoredUnixPath> = ["bin", "bin/run", "bin/start"]
            .into_iter()
            .map(|p| AnchoredUnixPath::new(p).unwrap())
            .collect();
        let blob = create_archive(&src, &files).unwrap();

        let (dst_dir, dst) = anchor();
        let restored = restore_archive(&blob, &dst).unwrap();
        assert_eq!(restored.len(), 3);
        let mode = fs::metadata(dst_dir.path().join("bin/run"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            fs::read_link(dst_dir.path().join("bin/start")).unwrap(),
            PathBuf::from("run")
        );
    }
}
