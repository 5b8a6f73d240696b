use crate::event::WatchEvent;
use crate::{Error, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Receives everything the [`FileWatcher`] observes.
///
/// Callbacks run on the dispatch thread, one subscriber after another, so they
/// should return quickly. Subscribers must not call back into the watcher.
pub trait FileWatchSubscriber: Send + Sync {
    /// A path changed.
    fn on_event(&self, event: &WatchEvent);

    /// The backend reported an error; events may have been lost.
    fn on_error(&self, error: &Error);

    /// The watcher shut down; no further callbacks follow.
    fn on_closed(&self);
}

type Subscribers = Arc<RwLock<Vec<Arc<dyn FileWatchSubscriber>>>>;

enum State {
    Idle,
    Running {
        watcher: RecommendedWatcher,
        dispatch: JoinHandle<()>,
    },
    Closed,
}

/// A recursive native watch on a root plus any added roots.
pub struct FileWatcher {
    root: PathBuf,
    subscribers: Subscribers,
    state: Mutex<State>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("root", &self.root)
            .field("subscribers", &self.subscribers.read().len())
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Prepare a watcher for `root`. Nothing is watched until [`Self::start`].
    ///
    /// The root is canonicalized so that event paths compare equal to paths
    /// derived from it.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|e| Error::io(e, root, "canonicalize"))?;
        Ok(Self {
            root,
            subscribers: Arc::new(RwLock::new(Vec::new())),
            state: Mutex::new(State::Idle),
        })
    }

    /// The canonical root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a subscriber. Subscribers are notified in registration order.
    pub fn add_subscriber(&self, subscriber: Arc<dyn FileWatchSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Establish the native watch and start dispatching. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            State::Running { .. } => return Ok(()),
            State::Closed => return Err(Error::WatcherClosed),
            State::Idle => {}
        }

        let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(tx).map_err(|e| Error::watch(&e))?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| Error::watch(&e))?;

        let subscribers = Arc::clone(&self.subscribers);
        let dispatch = thread::Builder::new()
            .name("strata-filewatch".to_string())
            .spawn(move || dispatch_loop(&rx, &subscribers))
            .map_err(|e| Error::io(e, &self.root, "spawn dispatch thread"))?;

        tracing::info!(root = %self.root.display(), "File watching started");
        *state = State::Running { watcher, dispatch };
        Ok(())
    }

    /// Watch another directory tree, e.g. a cookie directory outside the root.
    pub fn add_root(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let path = path
            .canonicalize()
            .map_err(|e| Error::io(e, path, "canonicalize"))?;
        let mut state = self.state.lock();
        match &mut *state {
            State::Running { watcher, .. } => {
                watcher
                    .watch(&path, RecursiveMode::Recursive)
                    .map_err(|e| Error::watch(&e))?;
                tracing::debug!(path = %path.display(), "Added watch root");
                Ok(())
            }
            State::Idle => Err(Error::NotStarted),
            State::Closed => Err(Error::WatcherClosed),
        }
    }

    /// Tear down the native watch and tell every subscriber. Idempotent.
    pub fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Closed);
        match previous {
            State::Running { watcher, dispatch } => {
                // Dropping the backend drops its sender and ends the dispatch loop
                drop(watcher);
                if dispatch.thread().id() != thread::current().id()
                    && dispatch.join().is_err()
                {
                    tracing::warn!("File watch dispatch thread panicked");
                }
                tracing::info!(root = %self.root.display(), "File watching stopped");
            }
            State::Idle => notify_closed(&self.subscribers),
            State::Closed => {}
        }
        Ok(())
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn snapshot(subscribers: &Subscribers) -> Vec<Arc<dyn FileWatchSubscriber>> {
    subscribers.read().clone()
}

fn notify_closed(subscribers: &Subscribers) {
    for subscriber in snapshot(subscribers) {
        subscriber.on_closed();
    }
}

fn dispatch_loop(rx: &mpsc::Receiver<notify::Result<notify::Event>>, subscribers: &Subscribers) {
    for result in rx {
        let current = snapshot(subscribers);
        match result {
            Ok(event) => {
                for event in WatchEvent::from_notify(event) {
                    tracing::trace!(path = %event.path.display(), kind = ?event.kind, "File event");
                    for subscriber in &current {
                        subscriber.on_event(&event);
                    }
                }
            }
            Err(e) => {
                let error = Error::watch(&e);
                tracing::warn!(error = %error, "File watch error");
                for subscriber in &current {
                    subscriber.on_error(&error);
                }
            }
        }
    }
    notify_closed(subscribers);
}
