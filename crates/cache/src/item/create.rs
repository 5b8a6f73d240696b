use crate::{Error, Result};
use std::fs;
use std::io::{self, Read, Write};
use strata_paths::{AbsolutePath, AnchoredUnixPath};

/// zstd level used for cache items.
const COMPRESSION_LEVEL: i32 = 3;

/// Longest name that fits in the ustar name field.
const NAME_FIELD_LEN: usize = 100;

/// Streams files into a cache item: a zstd-compressed tar.
///
/// Entries are written in the order they are added. Parents are not inferred;
/// callers list a directory before its children when they want it recorded.
/// Timestamps and ownership are zeroed so identical trees produce identical
/// blobs.
pub struct CacheWriter<W: Write> {
    builder: tar::Builder<zstd::Encoder<'static, W>>,
}

impl<W: Write> CacheWriter<W> {
    /// Start an archive that writes into `inner`.
    pub fn new(inner: W) -> Result<Self> {
        let encoder = zstd::Encoder::new(inner, COMPRESSION_LEVEL)
            .map_err(|e| Error::io_no_path(e, "zstd encoder"))?;
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        Ok(Self { builder })
    }

    /// Add one path, read from `anchor`.
    ///
    /// Symlinks are recorded as links and never followed; directories get a
    /// trailing `/`; regular files are streamed. Anything else is an
    /// [`Error::UnsupportedFileType`].
    pub fn add_file(&mut self, anchor: &AbsolutePath, path: &AnchoredUnixPath) -> Result<()> {
        let source = path.to_system()?.restore_anchor(anchor);
        let source = source.as_path();
        let meta = fs::symlink_metadata(source).map_err(|e| Error::io(e, source, "lstat"))?;
        let file_type = meta.file_type();

        let mut header = tar::Header::new_gnu();
        header.set_mode(mode_of(&meta));
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if file_type.is_symlink() {
            let target = fs::read_link(source).map_err(|e| Error::io(e, source, "readlink"))?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            self.builder
                .append_link(&mut header, path.as_str(), &target)
                .map_err(|e| Error::io(e, source, "append symlink"))?;
        } else if file_type.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            append_named(
                &mut self.builder,
                &mut header,
                path.to_dir_name().as_bytes(),
                io::empty(),
            )
            .map_err(|e| Error::io(e, source, "append directory"))?;
        } else if file_type.is_file() {
            let file = fs::File::open(source).map_err(|e| Error::io(e, source, "open"))?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(meta.len());
            self.builder
                .append_data(&mut header, path.as_str(), file)
                .map_err(|e| Error::io(e, source, "append file"))?;
        } else {
            return Err(Error::UnsupportedFileType {
                name: path.to_string(),
                kind: describe(&meta),
            });
        }
        tracing::trace!(path = %path, "Archived entry");
        Ok(())
    }

    /// Finish the tar stream and the zstd frame and return the writer.
    pub fn finish(self) -> Result<W> {
        let encoder = self
            .builder
            .into_inner()
            .map_err(|e| Error::io_no_path(e, "tar finalize"))?;
        encoder
            .finish()
            .map_err(|e| Error::io_no_path(e, "zstd finalize"))
    }
}

/// Archive `files` from `anchor` into an in-memory blob.
pub fn create_archive(anchor: &AbsolutePath, files: &[AnchoredUnixPath]) -> Result<Vec<u8>> {
    let _span = tracing::debug_span!("create_archive", anchor = %anchor, files = files.len()).entered();
    let mut writer = CacheWriter::new(Vec::new())?;
    for file in files {
        writer.add_file(anchor, file)?;
    }
    writer.finish()
}

/// Append an entry whose name is written verbatim, trailing `/` included.
///
/// `tar::Builder::append_data` normalizes names and would drop it. Names
/// longer than the header field go into a GNU long-name record first.
fn append_named<W: Write, R: Read>(
    builder: &mut tar::Builder<W>,
    header: &mut tar::Header,
    name: &[u8],
    data: R,
) -> io::Result<()> {
    if name.len() > NAME_FIELD_LEN {
        let mut long = tar::Header::new_gnu();
        set_name_field(&mut long, b"././@LongLink");
        long.set_mode(0o644);
        long.set_mtime(0);
        long.set_uid(0);
        long.set_gid(0);
        long.set_entry_type(tar::EntryType::GNULongName);
        long.set_size(name.len() as u64 + 1);
        long.set_cksum();
        builder.append(&long, name.chain(&[0u8][..]))?;
        set_name_field(header, &name[..NAME_FIELD_LEN]);
    } else {
        set_name_field(header, name);
    }
    header.set_cksum();
    builder.append(header, data)
}

fn set_name_field(header: &mut tar::Header, name: &[u8]) {
    let field = &mut header.as_old_mut().name;
    field.fill(0);
    field[..name.len()].copy_from_slice(name);
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn describe(meta: &fs::Metadata) -> String {
    use std::os::unix::fs::FileTypeExt;
    let file_type = meta.file_type();
    if file_type.is_fifo() {
        "named pipe".to_string()
    } else if file_type.is_socket() {
        "socket".to_string()
    } else if file_type.is_block_device() {
        "block device".to_string()
    } else if file_type.is_char_device() {
        "character device".to_string()
    } else {
        "unknown".to_string()
    }
}

#[cfg(not(unix))]
fn describe(_meta: &fs::Metadata) -> String {
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unix(p: &str) -> AnchoredUnixPath {
        AnchoredUnixPath::new(p).unwrap()
    }

    fn entries(blob: &[u8]) -> Vec<(String, tar::EntryType)> {
        let decoder = zstd::Decoder::new(blob).unwrap();
        let mut archive = tar::Archive::new(decoder);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    String::from_utf8(e.path_bytes().into_owned()).unwrap(),
                    e.header().entry_type(),
                )
            })
            .collect()
    }

    fn fixture() -> (TempDir, AbsolutePath) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("dist/nested")).unwrap();
        fs::write(dir.path().join("dist/nested/a.txt"), b"a").unwrap();
        let root = AbsolutePath::new(dir.path()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_entry_order_and_dir_slash() {
        let (_dir, root) = fixture();
        let blob =
            create_archive(&root, &[unix("dist"), unix("dist/nested"), unix("dist/nested/a.txt")])
                .unwrap();
        assert_eq!(
            entries(&blob),
            vec![
                ("dist/".to_string(), tar::EntryType::Directory),
                ("dist/nested/".to_string(), tar::EntryType::Directory),
                ("dist/nested/a.txt".to_string(), tar::EntryType::Regular),
            ]
        );
    }

    #[test]
    fn test_deterministic_blob() {
        let (_dir, root) = fixture();
        let files = [unix("dist"), unix("dist/nested/a.txt")];
        assert_eq!(
            create_archive(&root, &files).unwrap(),
            create_archive(&root, &files).unwrap()
        );
    }

    #[test]
    fn test_long_directory_name() {
        let dir = TempDir::new().unwrap();
        let long = "d".repeat(120);
        fs::create_dir(dir.path().join(&long)).unwrap();
        let root = AbsolutePath::new(dir.path()).unwrap();
        let blob = create_archive(&root, &[unix(&long)]).unwrap();
        assert_eq!(
            entries(&blob),
            vec![(format!("{long}/"), tar::EntryType::Directory)]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_not_followed() {
        let (dir, root) = fixture();
        std::os::unix::fs::symlink("nested/a.txt", dir.path().join("dist/link")).unwrap();
        let blob = create_archive(&root, &[unix("dist/link")]).unwrap();
        let decoder = zstd::Decoder::new(&blob[..]).unwrap();
        let mut archive = tar::Archive::new(decoder);
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().entry_type(), tar::EntryType::Symlink);
        assert_eq!(
            entry.link_name_bytes().unwrap().as_ref(),
            b"nested/a.txt"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_unsupported() {
        let dir = TempDir::new().unwrap();
        let fifo = dir.path().join("pipe");
        let c_path = std::ffi::CString::new(fifo.to_str().unwrap()).unwrap();
        #[allow(unsafe_code)]
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) };
        assert_eq!(rc, 0);
        let root = AbsolutePath::new(dir.path()).unwrap();
        let err = create_archive(&root, &[unix("pipe")]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType { ref kind, .. } if kind == "named pipe"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let (_dir, root) = fixture();
        let err = create_archive(&root, &[unix("nope")]).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
