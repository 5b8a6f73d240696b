use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use strata_paths::{AbsolutePath, AnchoredUnixPath};

/// Content hashes keyed by anchored path.
pub type FileHashes = BTreeMap<AnchoredUnixPath, String>;

/// Stream a file through SHA-256.
pub fn hash_file(path: &Path) -> Result<String> {
    let _span = tracing::trace_span!("hash_file", path = %path.display()).entered();
    let mut file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1024 * 64];
    let mut total: u64 = 0;
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(e, path, "read"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    tracing::trace!(path = %path.display(), size = total, "Hashed file");
    Ok(hex::encode(hasher.finalize()))
}

/// Hash files relative to `root`.
///
/// Any unreadable file fails the whole computation.
pub fn hash_files<I>(root: &AbsolutePath, files: I) -> Result<FileHashes>
where
    I: IntoIterator<Item = AnchoredUnixPath>,
{
    let mut hashes = FileHashes::new();
    for file in files {
        let absolute = file.to_system()?.restore_anchor(root);
        let hash = hash_file(absolute.as_path())?;
        hashes.insert(file, hash);
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_file_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, b"hello").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_hash_file_missing_is_error() {
        let dir = TempDir::new().unwrap();
        let err = hash_file(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::Io { ref operation, .. } if operation == "open"));
    }

    #[test]
    fn test_hash_files_keys_are_anchored() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), b"fn main() {}").unwrap();
        let root = AbsolutePath::new(dir.path()).unwrap();
        let key = AnchoredUnixPath::new("src/lib.rs").unwrap();
        let hashes = hash_files(&root, [key.clone()]).unwrap();
        assert_eq!(hashes.len(), 1);
        assert_eq!(
            hashes[&key],
            hash_file(&dir.path().join("src/lib.rs")).unwrap()
        );
    }
}
