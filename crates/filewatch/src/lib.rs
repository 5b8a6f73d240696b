//! File watching for the strata daemon.
//!
//! One [`FileWatcher`] holds the native recursive watch and fans every event
//! out to its subscribers in registration order. Two subscribers ship here:
//!
//! - [`CookieJar`] turns "have I seen every event up to now?" into a bounded
//!   wait on a sentinel file of its own.
//! - [`GlobWatcher`] remembers which output globs were written for a task hash
//!   and crosses them off as matching files change.

mod cookie;
mod error;
mod event;
mod glob;
mod watcher;

pub use cookie::{CookieJar, CookieWaiter};
pub use error::{Error, Result};
pub use event::{WatchEvent, WatchEventKind};
pub use glob::GlobWatcher;
pub use watcher::{FileWatchSubscriber, FileWatcher};
