use std::time::Duration;

/// Timeouts and budgets shared by the daemon and its clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonOptions {
    /// Exit after this long without a request; zero disables idle exit
    pub idle_timeout: Duration,
    /// Bound on each cookie barrier inside the daemon
    pub cookie_timeout: Duration,
    /// Per-attempt bound on reaching the socket
    pub connect_timeout: Duration,
    /// Connection attempts before giving up
    pub max_attempts: u32,
    /// Deadline for a single request/response exchange
    pub request_timeout: Duration,
    /// How long to wait for a daemon to exit after `Shutdown`
    pub shutdown_timeout: Duration,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(4 * 60 * 60),
            cookie_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(1),
            max_attempts: 3,
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
