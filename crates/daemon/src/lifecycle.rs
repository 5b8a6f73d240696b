//! Daemon startup, serving and cleanup.

use crate::options::DaemonOptions;
use crate::protocol::{Request, read_message, write_message};
use crate::server::{RepoRootMonitor, ServerContext};
use crate::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strata_config::DaemonPaths;
use strata_filewatch::{CookieJar, FileWatcher, GlobWatcher};
use strata_paths::AbsolutePath;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Longest gap between idle checks.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// How long open connections get to finish once shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Attempts at the pid-file lock before giving up.
const LOCK_ATTEMPTS: u32 = 5;

/// Pause between lock attempts. Clients probing a stale pid file hold the
/// lock only for an instant.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Everything a daemon process needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Repository the daemon serves
    pub repo_root: AbsolutePath,
    /// Socket, pid, log and cookie locations
    pub paths: DaemonPaths,
    /// Version clients must present in `Hello`
    pub version: String,
    /// Timeouts
    pub options: DaemonOptions,
}

/// Exclusive hold on the pid file for the daemon's lifetime.
#[derive(Debug)]
pub(crate) struct PidLock {
    _file: File,
}

impl PidLock {
    /// Lock `path` and record our pid in it.
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        // Don't truncate before holding the lock: that would wipe a live
        // daemon's pid
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(e, path, "open"))?;
        if file.try_lock_exclusive().is_err() {
            return Err(Error::LockHeld { path: path.into() });
        }
        file.set_len(0).map_err(|e| Error::io(e, path, "truncate"))?;
        write!(file, "{}", std::process::id()).map_err(|e| Error::io(e, path, "write"))?;
        file.sync_all().map_err(|e| Error::io(e, path, "sync"))?;
        Ok(Self { _file: file })
    }
}

/// Take the pid-file lock, riding out a client's momentary check.
pub(crate) async fn acquire_pid_lock(path: &Path) -> Result<PidLock> {
    let mut attempt = 1;
    loop {
        match PidLock::acquire(path) {
            Err(Error::LockHeld { .. }) if attempt < LOCK_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
            }
            result => return result,
        }
    }
}

/// Run a daemon until `shutdown` is cancelled, a client sends `Shutdown`,
/// the idle timeout passes or the repository root disappears.
///
/// The socket and pid file are removed before returning, unless the lock
/// could not be taken: those files then belong to the daemon that holds it.
pub async fn run_daemon(config: ServerConfig, shutdown: CancellationToken) -> Result<()> {
    let lock = acquire_pid_lock(config.paths.pid_file.as_path()).await?;
    tracing::info!(
        pid = std::process::id(),
        repo = %config.repo_root,
        version = %config.version,
        "Daemon starting"
    );

    let result = serve(&config, shutdown).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Daemon stopped with an error");
    }
    cleanup(&config.paths);
    drop(lock);
    tracing::info!("Daemon shutdown complete");
    result
}

async fn serve(config: &ServerConfig, shutdown: CancellationToken) -> Result<()> {
    let paths = &config.paths;
    let watcher = FileWatcher::new(&config.repo_root)?;
    let jar = Arc::new(CookieJar::new(&paths.cookie_dir, config.options.cookie_timeout)?);
    let globs = Arc::new(GlobWatcher::new(watcher.root(), jar.clone()));
    let ctx = Arc::new(ServerContext::new(
        config.version.clone(),
        paths.clone(),
        Arc::clone(&globs),
        shutdown.clone(),
    ));

    watcher.add_subscriber(jar.clone());
    watcher.add_subscriber(globs);
    watcher.add_subscriber(Arc::new(RepoRootMonitor::new(watcher.root(), shutdown.clone())));
    watcher.start()?;
    watcher.add_root(jar.dir())?;

    let listener = bind(paths.sock_file.as_path())?;
    tracing::info!(socket = %paths.sock_file, "Daemon listening");

    let tracker = TaskTracker::new();
    let idle_timeout = config.options.idle_timeout;
    let mut idle_check = tokio::time::interval(if idle_timeout.is_zero() {
        IDLE_CHECK_INTERVAL
    } else {
        idle_timeout.min(IDLE_CHECK_INTERVAL)
    });

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let ctx = Arc::clone(&ctx);
                        tracker.spawn(async move {
                            if let Err(e) = handle_connection(stream, &ctx).await {
                                tracing::debug!(error = %e, "Connection error");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
                }
            }

            _ = idle_check.tick() => {
                if !idle_timeout.is_zero() && ctx.idle_for() >= idle_timeout {
                    tracing::info!(idle_secs = idle_timeout.as_secs(), "Idle timeout reached, shutting down");
                    ctx.shutdown();
                }
            }

            () = shutdown.cancelled() => break,
        }
    }

    drop(listener);
    tracker.close();
    if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait()).await.is_err() {
        tracing::debug!("Connections still open at shutdown");
    }
    // Closing joins the dispatch thread
    match tokio::task::spawn_blocking(move || watcher.close()).await {
        Ok(result) => result?,
        Err(e) => tracing::warn!(error = %e, "File watcher close task failed"),
    }
    Ok(())
}

fn bind(sock: &Path) -> Result<UnixListener> {
    // We hold the lock, so any socket left here is stale
    match fs::remove_file(sock) {
        Ok(()) => tracing::debug!(socket = %sock.display(), "Removed stale socket"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io(e, sock, "remove stale socket")),
    }
    UnixListener::bind(sock).map_err(|e| Error::io(e, sock, "bind"))
}

async fn handle_connection(stream: UnixStream, ctx: &ServerContext) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let shutdown = ctx.shutdown_token();
    loop {
        let request = tokio::select! {
            result = read_message::<_, Request>(&mut reader) => match result {
                Ok(request) => request,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            },
            () = shutdown.cancelled() => return Ok(()),
        };
        ctx.touch();
        tracing::debug!(request = ?request, "Request");
        let response = ctx.handle(request).await;
        write_message(&mut writer, &response).await?;
    }
}

/// Remove the socket, then the pid file; a missing pid file tells clients
/// the daemon is gone.
fn cleanup(paths: &DaemonPaths) {
    for path in [paths.sock_file.as_path(), paths.pid_file.as_path()] {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove daemon file"),
        }
    }
}
