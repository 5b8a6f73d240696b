//! End-to-end behavior against the native watcher.

use std::fs;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use strata_config::TaskOutputs;
use strata_filewatch::{
    CookieJar, CookieWaiter, Error, FileWatchSubscriber, FileWatcher, GlobWatcher, WatchEvent,
    WatchEventKind,
};
use tempfile::TempDir;

const COOKIE_TIMEOUT: Duration = Duration::from_secs(5);

struct Forward(parking_lot::Mutex<mpsc::Sender<WatchEvent>>);

impl FileWatchSubscriber for Forward {
    fn on_event(&self, event: &WatchEvent) {
        let _ = self.0.lock().send(event.clone());
    }
    fn on_error(&self, _error: &Error) {}
    fn on_closed(&self) {}
}

struct Harness {
    _repo: TempDir,
    _data: TempDir,
    watcher: FileWatcher,
    jar: Arc<CookieJar>,
    globs: Arc<GlobWatcher>,
}

impl Harness {
    fn new() -> Self {
        let repo = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        fs::create_dir_all(repo.path().join("dist")).unwrap();
        fs::create_dir_all(repo.path().join("lib")).unwrap();

        let watcher = FileWatcher::new(repo.path()).unwrap();
        let jar = Arc::new(CookieJar::new(data.path().join("cookies"), COOKIE_TIMEOUT).unwrap());
        let globs = Arc::new(GlobWatcher::new(watcher.root(), jar.clone()));
        watcher.add_subscriber(jar.clone());
        watcher.add_subscriber(globs.clone());
        watcher.start().unwrap();
        watcher.add_root(jar.dir()).unwrap();
        Self {
            _repo: repo,
            _data: data,
            watcher,
            jar,
            globs,
        }
    }

    fn outputs() -> TaskOutputs {
        TaskOutputs {
            inclusions: vec!["dist/**".to_string(), "lib/**".to_string()],
            exclusions: Vec::new(),
        }
    }

    fn candidates() -> Vec<String> {
        Self::outputs().inclusions
    }
}

#[test]
fn events_reach_subscribers() {
    let repo = TempDir::new().unwrap();
    let watcher = FileWatcher::new(repo.path()).unwrap();
    let (tx, rx) = mpsc::channel();
    watcher.add_subscriber(Arc::new(Forward(parking_lot::Mutex::new(tx))));
    watcher.start().unwrap();

    let file = watcher.root().join("hello.txt");
    fs::write(&file, b"hi").unwrap();
    let seen = loop {
        let event = rx.recv_timeout(COOKIE_TIMEOUT).unwrap();
        if event.path == file {
            break event;
        }
    };
    assert_ne!(seen.kind, WatchEventKind::Deleted);
}

#[test]
fn cookie_round_trip() {
    let harness = Harness::new();
    harness.jar.wait_for_cookie().unwrap();
    harness.jar.wait_for_cookie().unwrap();
}

#[test]
fn unchanged_outputs_report_nothing() {
    let harness = Harness::new();
    fs::write(harness.watcher.root().join("dist/a.js"), b"built").unwrap();
    harness.globs.watch_globs("h1", &Harness::outputs()).unwrap();
    let changed = harness
        .globs
        .get_changed_globs("h1", &Harness::candidates())
        .unwrap();
    assert!(changed.is_empty(), "{changed:?}");
}

#[test]
fn changed_output_is_reported() {
    let harness = Harness::new();
    harness.globs.watch_globs("h1", &Harness::outputs()).unwrap();
    fs::write(harness.watcher.root().join("lib/index.js"), b"edited").unwrap();
    let changed = harness
        .globs
        .get_changed_globs("h1", &Harness::candidates())
        .unwrap();
    assert_eq!(changed, vec!["lib/**".to_string()]);
}

#[test]
fn close_fails_pending_and_future_waits() {
    let harness = Harness::new();
    harness.watcher.close().unwrap();
    assert!(matches!(
        harness.jar.wait_for_cookie(),
        Err(Error::WatcherClosed)
    ));
    assert!(matches!(
        harness.globs.get_changed_globs("h1", &Harness::candidates()),
        Err(Error::WatcherClosed)
    ));
}
