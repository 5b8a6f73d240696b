//! Request handling inside the daemon.

use crate::protocol::{DaemonStatus, ErrorCode, Request, Response};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_config::{DaemonPaths, TaskOutputs};
use strata_filewatch::{Error as WatchError, FileWatchSubscriber, GlobWatcher, WatchEvent, WatchEventKind};
use tokio_util::sync::CancellationToken;

/// State shared by every connection of one daemon.
///
/// Built once at startup and handed to each handler. Shutdown is a method
/// here rather than ambient global state.
pub struct ServerContext {
    version: String,
    paths: DaemonPaths,
    started: Instant,
    last_activity: Mutex<Instant>,
    globs: Arc<GlobWatcher>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("version", &self.version)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl ServerContext {
    /// Create the context.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        paths: DaemonPaths,
        globs: Arc<GlobWatcher>,
        shutdown: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            version: version.into(),
            paths,
            started: now,
            last_activity: Mutex::new(now),
            globs,
            shutdown,
        }
    }

    /// Ask the server loop to stop.
    ///
    /// Returns immediately. A `Shutdown` handler calls this and still gets
    /// to deliver its response; waiting here for the loop to finish would
    /// deadlock, since the loop waits for the handler.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("Daemon shutdown requested");
        }
        self.shutdown.cancel();
    }

    /// Token cancelled when the daemon stops.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Record that a request arrived.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last request.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            uptime_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            log_file: self.paths.log_file.as_path().to_path_buf(),
            pid_file: self.paths.pid_file.as_path().to_path_buf(),
            sock_file: self.paths.sock_file.as_path().to_path_buf(),
        }
    }

    /// Answer one request.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Hello { version } => {
                if version == self.version {
                    Response::Hello
                } else {
                    tracing::warn!(client = %version, server = %self.version, "Rejecting client with different version");
                    Response::Error {
                        code: ErrorCode::VersionMismatch,
                        message: format!("client {version}, server {}", self.version),
                    }
                }
            }
            Request::Shutdown => {
                self.shutdown();
                Response::ShuttingDown
            }
            Request::Status => Response::Status {
                status: self.status(),
            },
            Request::NotifyOutputsWritten {
                hash,
                output_globs,
                output_exclusion_globs,
            } => {
                let globs = Arc::clone(&self.globs);
                let outputs = TaskOutputs {
                    inclusions: output_globs,
                    exclusions: output_exclusion_globs,
                };
                // Cookie waits block, so keep them off the async workers
                run_blocking(move || globs.watch_globs(&hash, &outputs))
                    .await
                    .map_or_else(error_response, |()| Response::OutputsRecorded)
            }
            Request::GetChangedOutputs { hash, output_globs } => {
                let globs = Arc::clone(&self.globs);
                run_blocking(move || globs.get_changed_globs(&hash, &output_globs))
                    .await
                    .map_or_else(error_response, |globs| Response::ChangedOutputs { globs })
            }
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, (ErrorCode, String)>
where
    F: FnOnce() -> strata_filewatch::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err((error_code(&e), e.to_string())),
        Err(e) => Err((ErrorCode::Internal, e.to_string())),
    }
}

fn error_code(error: &WatchError) -> ErrorCode {
    match error {
        WatchError::CookieTimeout { .. } => ErrorCode::CookieTimeout,
        WatchError::WatcherClosed => ErrorCode::Closed,
        WatchError::Glob { .. } => ErrorCode::InvalidRequest,
        _ => ErrorCode::Internal,
    }
}

fn error_response((code, message): (ErrorCode, String)) -> Response {
    tracing::debug!(code = ?code, message = %message, "Request failed");
    Response::Error { code, message }
}

/// Stops the daemon when the repository it serves is deleted.
#[derive(Debug)]
pub struct RepoRootMonitor {
    root: PathBuf,
    shutdown: CancellationToken,
}

impl RepoRootMonitor {
    /// Watch for deletion of `root`, which must be the watcher's canonical root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, shutdown: CancellationToken) -> Self {
        Self {
            root: root.into(),
            shutdown,
        }
    }
}

impl FileWatchSubscriber for RepoRootMonitor {
    fn on_event(&self, event: &WatchEvent) {
        if event.kind == WatchEventKind::Deleted && event.path == self.root {
            tracing::warn!(root = %self.root.display(), "Repository root deleted, shutting down");
            self.shutdown.cancel();
        }
    }

    fn on_error(&self, _error: &WatchError) {}

    fn on_closed(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_filewatch::CookieWaiter;
    use strata_paths::AbsolutePath;
    use tempfile::TempDir;

    struct NoCookies;

    impl CookieWaiter for NoCookies {
        fn wait_for_cookie(&self) -> strata_filewatch::Result<()> {
            Ok(())
        }
    }

    fn paths(dir: &TempDir) -> DaemonPaths {
        let root = AbsolutePath::new(dir.path()).unwrap();
        DaemonPaths {
            runtime_dir: root.clone(),
            sock_file: root.join_component("strata.sock").unwrap(),
            pid_file: root.join_component("strata.pid").unwrap(),
            log_file: root.join_component("strata.log").unwrap(),
            cookie_dir: root.join_component("cookies").unwrap(),
        }
    }

    fn context(dir: &TempDir) -> ServerContext {
        let globs = Arc::new(GlobWatcher::new(dir.path(), Arc::new(NoCookies)));
        ServerContext::new("1.0.0", paths(dir), globs, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_hello_checks_version_exactly() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert_eq!(
            ctx.handle(Request::Hello {
                version: "1.0.0".to_string()
            })
            .await,
            Response::Hello
        );
        let response = ctx
            .handle(Request::Hello {
                version: "1.0.0-dev".to_string(),
            })
            .await;
        assert!(matches!(
            response,
            Response::Error {
                code: ErrorCode::VersionMismatch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_shutdown_returns_immediately() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let token = ctx.shutdown_token();
        assert_eq!(ctx.handle(Request::Shutdown).await, Response::ShuttingDown);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_outputs_round_trip() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let recorded = ctx
            .handle(Request::NotifyOutputsWritten {
                hash: "h".to_string(),
                output_globs: vec!["dist/**".to_string()],
                output_exclusion_globs: Vec::new(),
            })
            .await;
        assert_eq!(recorded, Response::OutputsRecorded);

        let changed = ctx
            .handle(Request::GetChangedOutputs {
                hash: "h".to_string(),
                output_globs: vec!["dist/**".to_string(), "lib/**".to_string()],
            })
            .await;
        assert_eq!(
            changed,
            Response::ChangedOutputs {
                globs: vec!["lib/**".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_glob_is_invalid_request() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let response = ctx
            .handle(Request::NotifyOutputsWritten {
                hash: "h".to_string(),
                output_globs: vec!["dist/[".to_string()],
                output_exclusion_globs: Vec::new(),
            })
            .await;
        assert!(matches!(
            response,
            Response::Error {
                code: ErrorCode::InvalidRequest,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_status_reports_paths() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let Response::Status { status } = ctx.handle(Request::Status).await else {
            panic!("expected status");
        };
        assert_eq!(status.sock_file, dir.path().join("strata.sock"));
        assert_eq!(status.log_file, dir.path().join("strata.log"));
    }

    #[test]
    fn test_repo_root_monitor() {
        let token = CancellationToken::new();
        let monitor = RepoRootMonitor::new("/repo", token.clone());
        monitor.on_event(&WatchEvent {
            path: PathBuf::from("/repo/file"),
            kind: WatchEventKind::Deleted,
        });
        assert!(!token.is_cancelled());
        monitor.on_event(&WatchEvent {
            path: PathBuf::from("/repo"),
            kind: WatchEventKind::Deleted,
        });
        assert!(token.is_cancelled());
    }
}
