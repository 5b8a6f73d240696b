//! Cookie barriers.
//!
//! Events arrive asynchronously. To be sure every change made before "now"
//! has been delivered, write a uniquely named file into a watched directory
//! and wait for its own creation event: the backend delivers events in
//! order, so anything earlier has been seen by then.

use crate::event::{WatchEvent, WatchEventKind};
use crate::watcher::FileWatchSubscriber;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::time::Duration;

/// Blocks until the event stream has caught up.
pub trait CookieWaiter: Send + Sync {
    /// Return once every event that happened before the call was delivered.
    fn wait_for_cookie(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Seen,
    Closed,
}

#[derive(Debug, Default)]
struct JarState {
    pending: HashMap<PathBuf, SyncSender<Outcome>>,
    closed: bool,
}

/// Cookie files in a private directory.
///
/// Register the jar as a subscriber of a [`crate::FileWatcher`] that watches
/// [`CookieJar::dir`].
#[derive(Debug)]
pub struct CookieJar {
    dir: PathBuf,
    timeout: Duration,
    serial: AtomicU64,
    state: Mutex<JarState>,
}

impl CookieJar {
    /// Create the jar, clearing cookies left behind by a previous process.
    pub fn new(dir: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let dir = dir.as_ref();
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(e, dir, "remove_dir_all")),
        }
        fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;
        let dir = dir
            .canonicalize()
            .map_err(|e| Error::io(e, dir, "canonicalize"))?;
        Ok(Self {
            dir,
            timeout,
            serial: AtomicU64::new(0),
            state: Mutex::new(JarState::default()),
        })
    }

    /// The canonical cookie directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn forget(&self, path: &Path) {
        self.state.lock().pending.remove(path);
        let _ = fs::remove_file(path);
    }
}

impl CookieWaiter for CookieJar {
    fn wait_for_cookie(&self) -> Result<()> {
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(format!("{serial}.cookie"));
        let (tx, rx) = mpsc::sync_channel(1);
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::WatcherClosed);
            }
            state.pending.insert(path.clone(), tx);
        }

        if let Err(e) = fs::write(&path, b"") {
            self.forget(&path);
            return Err(Error::io(e, &path, "write cookie"));
        }

        let outcome = rx.recv_timeout(self.timeout);
        self.forget(&path);
        match outcome {
            Ok(Outcome::Seen) => Ok(()),
            Ok(Outcome::Closed) | Err(RecvTimeoutError::Disconnected) => Err(Error::WatcherClosed),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(cookie = %path.display(), "Cookie wait timed out");
                Err(Error::CookieTimeout {
                    path: path.into(),
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}

impl FileWatchSubscriber for CookieJar {
    fn on_event(&self, event: &WatchEvent) {
        if event.kind == WatchEventKind::Deleted {
            return;
        }
        if let Some(tx) = self.state.lock().pending.remove(&event.path) {
            let _ = tx.try_send(Outcome::Seen);
        }
    }

    fn on_error(&self, _error: &Error) {}

    fn on_closed(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for (_, tx) in state.pending.drain() {
            let _ = tx.try_send(Outcome::Closed);
        }
    }
}
