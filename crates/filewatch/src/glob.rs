//! Output glob tracking.
//!
//! After a task writes its outputs, the daemon records the task hash with its
//! output globs. Every later file event crosses off the globs it matches. A
//! query then answers "which of these globs changed since they were written"
//! from memory, without touching the disk.

use crate::cookie::CookieWaiter;
use crate::event::{WatchEvent, WatchEventKind};
use crate::watcher::FileWatchSubscriber;
use crate::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use strata_config::TaskOutputs;

#[derive(Debug)]
struct TrackedOutputs {
    /// Inclusion globs with no matching change yet
    unchanged: HashSet<String>,
    exclusions: GlobSet,
}

#[derive(Debug, Default)]
struct GlobState {
    closed: bool,
    /// hash -> globs written for it
    hash_globs: HashMap<String, TrackedOutputs>,
    /// glob -> hashes still counting on it
    glob_hashes: HashMap<String, HashSet<String>>,
    matchers: HashMap<String, GlobSet>,
}

impl GlobState {
    fn reset(&mut self) {
        self.hash_globs.clear();
        self.glob_hashes.clear();
        self.matchers.clear();
    }
}

/// Tracks which output globs changed since they were written.
pub struct GlobWatcher {
    repo_root: PathBuf,
    cookies: Arc<dyn CookieWaiter>,
    state: RwLock<GlobState>,
}

impl std::fmt::Debug for GlobWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobWatcher")
            .field("repo_root", &self.repo_root)
            .finish_non_exhaustive()
    }
}

impl GlobWatcher {
    /// `repo_root` must be the root the events are reported under, i.e.
    /// [`crate::FileWatcher::root`].
    pub fn new(repo_root: impl Into<PathBuf>, cookies: Arc<dyn CookieWaiter>) -> Self {
        Self {
            repo_root: repo_root.into(),
            cookies,
            state: RwLock::new(GlobState::default()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.read().closed {
            return Err(Error::WatcherClosed);
        }
        Ok(())
    }

    /// Start tracking `outputs` for `hash`.
    ///
    /// Waits for a cookie first so that the writes the task just made are not
    /// mistaken for later changes.
    pub fn watch_globs(&self, hash: &str, outputs: &TaskOutputs) -> Result<()> {
        self.ensure_open()?;
        let mut compiled = Vec::with_capacity(outputs.inclusions.len());
        for glob in &outputs.inclusions {
            compiled.push((glob.clone(), compile(std::slice::from_ref(glob))?));
        }
        let exclusions = compile(&outputs.exclusions)?;

        self.cookies.wait_for_cookie()?;

        let mut state = self.state.write();
        if state.closed {
            return Err(Error::WatcherClosed);
        }
        let GlobState {
            hash_globs,
            glob_hashes,
            matchers,
            ..
        } = &mut *state;
        for (glob, matcher) in compiled {
            glob_hashes
                .entry(glob.clone())
                .or_default()
                .insert(hash.to_string());
            matchers.entry(glob).or_insert(matcher);
        }
        hash_globs.insert(
            hash.to_string(),
            TrackedOutputs {
                unchanged: outputs.inclusions.iter().cloned().collect(),
                exclusions,
            },
        );
        tracing::debug!(hash = %hash, globs = outputs.inclusions.len(), "Watching output globs");
        Ok(())
    }

    /// The subset of `candidates` that may have changed since they were
    /// registered for `hash`. An unknown hash reports every candidate.
    pub fn get_changed_globs(&self, hash: &str, candidates: &[String]) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.cookies.wait_for_cookie()?;

        let state = self.state.read();
        if state.closed {
            return Err(Error::WatcherClosed);
        }
        let changed = match state.hash_globs.get(hash) {
            Some(tracked) => candidates
                .iter()
                .filter(|glob| !tracked.unchanged.contains(*glob))
                .cloned()
                .collect(),
            None => candidates.to_vec(),
        };
        Ok(changed)
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rest = path.strip_prefix(&self.repo_root).ok()?;
        let mut segments = Vec::new();
        for component in rest.components() {
            match component {
                Component::Normal(segment) => segments.push(segment.to_str()?),
                _ => return None,
            }
        }
        Some(segments.join("/"))
    }
}

impl FileWatchSubscriber for GlobWatcher {
    fn on_event(&self, event: &WatchEvent) {
        let Some(relative) = self.relative(&event.path) else {
            return;
        };
        let mut state = self.state.write();
        if relative.is_empty() {
            if event.kind == WatchEventKind::Deleted {
                state.reset();
            }
            return;
        }

        let GlobState {
            hash_globs,
            glob_hashes,
            matchers,
            ..
        } = &mut *state;
        for (glob, hashes) in glob_hashes.iter_mut() {
            if !matchers.get(glob).is_some_and(|m| m.is_match(&relative)) {
                continue;
            }
            hashes.retain(|hash| {
                let Some(tracked) = hash_globs.get_mut(hash) else {
                    return false;
                };
                if tracked.exclusions.is_match(&relative) {
                    return true;
                }
                tracked.unchanged.remove(glob);
                if tracked.unchanged.is_empty() {
                    hash_globs.remove(hash);
                }
                tracing::trace!(hash = %hash, glob = %glob, path = %relative, "Output glob changed");
                false
            });
        }
        glob_hashes.retain(|_, hashes| !hashes.is_empty());
        matchers.retain(|glob, _| glob_hashes.contains_key(glob));
    }

    fn on_error(&self, error: &Error) {
        // Events may have been dropped, so nothing can be vouched for
        tracing::warn!(error = %error, "Forgetting watched output globs");
        self.state.write().reset();
    }

    fn on_closed(&self) {
        let mut state = self.state.write();
        state.closed = true;
        state.reset();
    }
}

/// Compile globs relative to the repository root.
///
/// `dir/**` also matches `dir` itself, so deleting the directory counts as a
/// change.
fn compile(globs: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in globs {
        add_glob(&mut builder, pattern)?;
        if let Some(base) = pattern.strip_suffix("/**") {
            add_glob(&mut builder, base)?;
        }
    }
    builder.build().map_err(|e| Error::Glob {
        pattern: globs.join(","),
        message: e.to_string(),
    })
}

fn add_glob(builder: &mut GlobSetBuilder, pattern: &str) -> Result<()> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| Error::Glob {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
    builder.add(glob);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Cookies {
        fail: AtomicBool,
    }

    impl CookieWaiter for Cookies {
        fn wait_for_cookie(&self) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::CookieTimeout {
                    path: Path::new("/cookies/1.cookie").into(),
                    timeout_ms: 1,
                });
            }
            Ok(())
        }
    }

    fn watcher() -> (GlobWatcher, Arc<Cookies>) {
        let cookies = Arc::new(Cookies::default());
        (GlobWatcher::new("/repo", cookies.clone()), cookies)
    }

    fn outputs(inclusions: &[&str], exclusions: &[&str]) -> TaskOutputs {
        TaskOutputs {
            inclusions: inclusions.iter().map(ToString::to_string).collect(),
            exclusions: exclusions.iter().map(ToString::to_string).collect(),
        }
    }

    fn globs(v: &[&str]) -> Vec<String> {
        v.iter().map(ToString::to_string).collect()
    }

    fn touch(watcher: &GlobWatcher, path: &str) {
        watcher.on_event(&WatchEvent {
            path: PathBuf::from(path),
            kind: WatchEventKind::Modified,
        });
    }

    #[test]
    fn test_unknown_hash_reports_everything() {
        let (w, _) = watcher();
        let candidates = globs(&["dist/**", "lib/**"]);
        assert_eq!(w.get_changed_globs("nope", &candidates).unwrap(), candidates);
    }

    #[test]
    fn test_no_change_reports_nothing() {
        let (w, _) = watcher();
        w.watch_globs("h", &outputs(&["dist/**", "lib/**"], &[])).unwrap();
        touch(&w, "/repo/src/index.ts");
        touch(&w, "/elsewhere/dist/a.js");
        assert!(
            w.get_changed_globs("h", &globs(&["dist/**", "lib/**"]))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_only_matching_glob_changes() {
        let (w, _) = watcher();
        w.watch_globs("h", &outputs(&["dist/**", "lib/**"], &[])).unwrap();
        touch(&w, "/repo/dist/nested/a.js");
        assert_eq!(
            w.get_changed_globs("h", &globs(&["dist/**", "lib/**"])).unwrap(),
            globs(&["dist/**"])
        );
    }

    #[test]
    fn test_excluded_path_does_not_count() {
        let (w, _) = watcher();
        w.watch_globs("h", &outputs(&["dist/**"], &["dist/cache/**"]))
            .unwrap();
        touch(&w, "/repo/dist/cache/x");
        assert!(w.get_changed_globs("h", &globs(&["dist/**"])).unwrap().is_empty());
        touch(&w, "/repo/dist/main.js");
        assert_eq!(
            w.get_changed_globs("h", &globs(&["dist/**"])).unwrap(),
            globs(&["dist/**"])
        );
    }

    #[test]
    fn test_directory_deletion_counts() {
        let (w, _) = watcher();
        w.watch_globs("h", &outputs(&["dist/**"], &[])).unwrap();
        w.on_event(&WatchEvent {
            path: PathBuf::from("/repo/dist"),
            kind: WatchEventKind::Deleted,
        });
        assert_eq!(
            w.get_changed_globs("h", &globs(&["dist/**"])).unwrap(),
            globs(&["dist/**"])
        );
    }

    #[test]
    fn test_shared_glob_affects_every_hash() {
        let (w, _) = watcher();
        w.watch_globs("a", &outputs(&["dist/**"], &[])).unwrap();
        w.watch_globs("b", &outputs(&["dist/**", "types/**"], &[])).unwrap();
        touch(&w, "/repo/dist/x.js");
        assert_eq!(w.get_changed_globs("a", &globs(&["dist/**"])).unwrap(), globs(&["dist/**"]));
        assert_eq!(
            w.get_changed_globs("b", &globs(&["dist/**", "types/**"])).unwrap(),
            globs(&["dist/**"])
        );
    }

    #[test]
    fn test_unregistered_candidate_is_changed() {
        let (w, _) = watcher();
        w.watch_globs("h", &outputs(&["dist/**"], &[])).unwrap();
        assert_eq!(
            w.get_changed_globs("h", &globs(&["dist/**", "out/**"])).unwrap(),
            globs(&["out/**"])
        );
    }

    #[test]
    fn test_error_forgets_everything() {
        let (w, _) = watcher();
        w.watch_globs("h", &outputs(&["dist/**"], &[])).unwrap();
        w.on_error(&Error::Watch {
            message: "queue overflow".to_string(),
        });
        assert_eq!(w.get_changed_globs("h", &globs(&["dist/**"])).unwrap(), globs(&["dist/**"]));
    }

    #[test]
    fn test_cookie_failure_propagates() {
        let (w, cookies) = watcher();
        cookies.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            w.watch_globs("h", &outputs(&["dist/**"], &[])),
            Err(Error::CookieTimeout { .. })
        ));
        assert!(matches!(
            w.get_changed_globs("h", &globs(&["dist/**"])),
            Err(Error::CookieTimeout { .. })
        ));
    }

    #[test]
    fn test_closed() {
        let (w, _) = watcher();
        w.on_closed();
        assert!(matches!(
            w.watch_globs("h", &outputs(&["dist/**"], &[])),
            Err(Error::WatcherClosed)
        ));
    }

    #[test]
    fn test_invalid_glob() {
        let (w, _) = watcher();
        assert!(matches!(
            w.watch_globs("h", &outputs(&["dist/[**"], &[])),
            Err(Error::Glob { .. })
        ));
    }
}
