//! Finding, starting and reclaiming the daemon from the client side.

// libc::kill is the only way to check and signal the recorded pid
#![allow(unsafe_code)]

use crate::client::DaemonClient;
use crate::options::DaemonOptions;
use crate::{Error, Result};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use strata_config::DaemonPaths;
use strata_paths::AbsolutePath;
use tokio::process::Command;

/// Pause between failed connection attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// How often to look for the socket or pid file while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Connects to the daemon for one repository, starting it if needed.
///
/// Each attempt walks the same steps: find or spawn the daemon, wait for its
/// socket, connect, handshake. A failed step reclaims stale state and tries
/// again, up to [`DaemonOptions::max_attempts`] times.
#[derive(Debug, Clone)]
pub struct Connector {
    bin: PathBuf,
    repo_root: AbsolutePath,
    paths: DaemonPaths,
    version: String,
    options: DaemonOptions,
    dont_start: bool,
}

impl Connector {
    /// Create a connector that spawns `bin daemon` in `repo_root` when no
    /// daemon is running.
    #[must_use]
    pub fn new(
        bin: impl Into<PathBuf>,
        repo_root: AbsolutePath,
        paths: DaemonPaths,
        version: impl Into<String>,
        options: DaemonOptions,
    ) -> Self {
        Self {
            bin: bin.into(),
            repo_root,
            paths,
            version: version.into(),
            options,
            dont_start: false,
        }
    }

    /// Only connect to an already running daemon.
    #[must_use]
    pub fn dont_start(mut self, dont_start: bool) -> Self {
        self.dont_start = dont_start;
        self
    }

    /// Files of the daemon this connector manages.
    #[must_use]
    pub fn paths(&self) -> &DaemonPaths {
        &self.paths
    }

    /// Return a handshaken client.
    pub async fn connect(&self) -> Result<DaemonClient> {
        tracing::debug!(sock = %self.paths.sock_file, dont_start = self.dont_start, "Connecting to daemon");
        for attempt in 1..=self.options.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            let pid = self.get_or_start_server().await?;

            if !self.wait_for_socket().await {
                tracing::debug!(pid, attempt, "Daemon socket did not appear");
                self.kill_dead_server(pid)?;
                continue;
            }

            let mut client = match DaemonClient::connect(&self.paths, &self.options).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::debug!(pid, attempt, error = %e, "Failed to connect to daemon socket");
                    self.kill_dead_server(pid)?;
                    continue;
                }
            };

            match client.hello(&self.version).await {
                Ok(()) => return Ok(client),
                Err(Error::VersionMismatch { message }) => {
                    tracing::info!(pid, message = %message, "Restarting daemon with a different version");
                    self.kill_live_server(client, pid).await?;
                }
                Err(e) if e.is_connection_failure() => {
                    tracing::debug!(pid, attempt, error = %e, "Handshake failed");
                    self.kill_dead_server(pid)?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::TooManyAttempts {
            attempts: self.options.max_attempts,
        })
    }

    /// Stop a running daemon and wait for it to exit.
    ///
    /// Returns `false` if no daemon was running.
    pub async fn stop(&self) -> Result<bool> {
        let connector = self.clone().dont_start(true);
        let client = match connector.connect().await {
            Ok(client) => client,
            Err(Error::DaemonNotRunning) => return Ok(false),
            Err(e) => return Err(e),
        };
        let Some(pid) = read_pid(self.paths.pid_file.as_path())? else {
            // Exited between the handshake and here
            return Ok(true);
        };
        self.kill_live_server(client, pid).await?;
        Ok(true)
    }

    async fn get_or_start_server(&self) -> Result<u32> {
        if let Some(pid) = read_pid(self.paths.pid_file.as_path())? {
            return Ok(pid);
        }
        if self.dont_start {
            return Err(Error::DaemonNotRunning);
        }
        self.start_server()
    }

    /// The command that runs a daemon with this connector's options.
    fn daemon_command(&self) -> Command {
        let idle = self.options.idle_timeout;
        // Round up so a sub-second timeout does not become "disabled"
        let idle_secs = idle.as_secs() + u64::from(idle.subsec_nanos() > 0);

        let mut command = Command::new(&self.bin);
        command
            .arg("daemon")
            .arg("--idle-timeout")
            .arg(idle_secs.to_string())
            .current_dir(self.repo_root.as_path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Keep terminal signals aimed at the client away from the daemon
            .process_group(0);
        command
    }

    fn start_server(&self) -> Result<u32> {
        let child = self
            .daemon_command()
            .spawn()
            .map_err(|e| Error::io(e, &self.bin, "spawn daemon"))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::connection("daemon exited immediately"))?;
        tracing::info!(pid, bin = %self.bin.display(), "Started daemon");
        Ok(pid)
    }

    async fn wait_for_socket(&self) -> bool {
        let sock = self.paths.sock_file.as_path();
        let deadline = Instant::now() + self.options.connect_timeout;
        loop {
            if sock.exists() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Reclaim the files of an unresponsive daemon recorded as `pid`.
    ///
    /// | pid file            | process | lock   | outcome                       |
    /// |---------------------|---------|--------|-------------------------------|
    /// | missing or other pid | -      | -      | nothing to do                 |
    /// | `pid`               | dead    | free   | socket and pid file removed   |
    /// | `pid`               | live    | free   | [`Error::DeadOwner`]          |
    /// | `pid`               | live    | held   | SIGTERM sent                  |
    /// | `pid`               | dead    | held   | [`Error::LockHeld`]           |
    pub fn kill_dead_server(&self, pid: u32) -> Result<()> {
        let pid_file = self.paths.pid_file.as_path();
        if read_pid(pid_file)? != Some(pid) {
            // Gone, or a different daemon took over; either way retry
            return Ok(());
        }
        let alive = process_alive(pid);
        let Some(held) = lock_held(pid_file)? else {
            return Ok(());
        };

        match (alive, held) {
            (false, false) => {
                tracing::info!(pid, "Removing files of dead daemon");
                remove_if_exists(self.paths.sock_file.as_path())?;
                remove_if_exists(pid_file)?;
                Ok(())
            }
            (true, false) => {
                tracing::warn!(pid, pid_file = %pid_file.display(), "Pid file names a live process that is not the daemon");
                Err(Error::DeadOwner {
                    pid,
                    path: pid_file.into(),
                })
            }
            (true, true) => {
                tracing::warn!(pid, "Terminating unresponsive daemon");
                terminate(pid);
                Ok(())
            }
            (false, true) => Err(Error::LockHeld {
                path: pid_file.into(),
            }),
        }
    }

    async fn kill_live_server(&self, mut client: DaemonClient, pid: u32) -> Result<()> {
        if let Err(e) = client.shutdown().await {
            tracing::debug!(pid, error = %e, "Shutdown request failed");
            return self.kill_dead_server(pid);
        }
        drop(client);

        let pid_file = self.paths.pid_file.as_path();
        let deadline = Instant::now() + self.options.shutdown_timeout;
        loop {
            if read_pid(pid_file)? != Some(pid) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::ShutdownTimeout { pid });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Read the pid recorded in `path`.
///
/// A missing file means no daemon. An empty or garbled file is treated the
/// same: a starting daemon truncates the file before writing its pid.
pub fn read_pid(path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse().ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(e, path, "read pid file")),
    }
}

/// Whether some process holds the daemon lock on `pid_file`; `None` if the
/// file disappeared.
fn lock_held(pid_file: &Path) -> Result<Option<bool>> {
    let file = match OpenOptions::new().read(true).open(pid_file) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(e, pid_file, "open pid file")),
    };
    // The check holds the lock for an instant. A daemon starting in that
    // window retries its own lock rather than failing with `LockHeld`.
    match file.try_lock_exclusive() {
        // Dropping the file releases the lock
        Ok(()) => Ok(Some(false)),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(Some(true)),
        Err(e) => Err(Error::io(e, pid_file, "lock pid file")),
    }
}

fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs permission and existence checks only
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn terminate(pid: u32) {
    if let Ok(pid) = libc::pid_t::try_from(pid) {
        // SAFETY: the target holds the daemon lock, so it is our daemon
        unsafe {
            let _ = libc::kill(pid, libc::SIGTERM);
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(e, path, "remove")),
    }
}
