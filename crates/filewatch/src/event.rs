use notify::event::{EventKind, ModifyKind};
use std::path::PathBuf;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    /// Created
    Created,
    /// Removed
    Deleted,
    /// Contents or metadata changed
    Modified,
    /// Moved to or from this path
    Renamed,
    /// The backend could not say
    Unknown,
}

/// A single change to a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Absolute path as reported by the backend
    pub path: PathBuf,
    /// The kind of change
    pub kind: WatchEventKind,
}

impl WatchEvent {
    /// Split a backend event into one event per path.
    ///
    /// Pure access notifications carry no change and map to nothing.
    pub(crate) fn from_notify(event: notify::Event) -> Vec<Self> {
        let kind = match event.kind {
            EventKind::Access(_) => return Vec::new(),
            EventKind::Create(_) => WatchEventKind::Created,
            EventKind::Remove(_) => WatchEventKind::Deleted,
            EventKind::Modify(ModifyKind::Name(_)) => WatchEventKind::Renamed,
            EventKind::Modify(_) => WatchEventKind::Modified,
            EventKind::Any | EventKind::Other => WatchEventKind::Unknown,
        };
        event
            .paths
            .into_iter()
            .map(|path| Self { path, kind })
            .collect()
    }
}
