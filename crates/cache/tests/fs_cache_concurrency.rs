//! Readers racing writers on the local cache only ever see whole entries.

use std::fs;
use std::sync::Arc;
use std::thread;
use strata_cache::{CacheBackend, FsCache};
use strata_paths::{AbsolutePath, AnchoredUnixPath};
use tempfile::TempDir;

#[test]
fn concurrent_put_and_fetch_never_observe_partial_items() {
    let tmp = TempDir::new().unwrap();
    let cache = Arc::new(FsCache::new(AbsolutePath::new(tmp.path().join("cache")).unwrap()).unwrap());
    let payload = vec![b'x'; 256 * 1024];

    let mut writers = Vec::new();
    for i in 0..4 {
        let src = tmp.path().join(format!("src{i}"));
        fs::create_dir(&src).unwrap();
        fs::write(src.join("big.bin"), &payload).unwrap();
        let src = AbsolutePath::new(src).unwrap();
        let cache = Arc::clone(&cache);
        writers.push(thread::spawn(move || {
            let files = [AnchoredUnixPath::new("big.bin").unwrap()];
            for _ in 0..5 {
                cache.put(&src, "shared-key", 10, &files).unwrap();
            }
        }));
    }

    let mut readers = Vec::new();
    for i in 0..4 {
        let dst = AbsolutePath::new(tmp.path().join(format!("dst{i}"))).unwrap();
        let cache = Arc::clone(&cache);
        let expected = payload.len();
        readers.push(thread::spawn(move || {
            for _ in 0..20 {
                if let Some(hit) = cache.fetch(&dst, "shared-key").unwrap() {
                    assert_eq!(hit.duration_ms, 10);
                    let restored = fs::read(dst.as_path().join("big.bin")).unwrap();
                    assert_eq!(restored.len(), expected);
                }
            }
        }));
    }

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }
    assert!(cache.exists("shared-key").unwrap().local);
}
