//! Signal handling for the foreground daemon

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel the returned token on SIGTERM or SIGINT.
///
/// A client reclaiming an unresponsive daemon sends SIGTERM; cancelling lets
/// the daemon remove its socket and pid file on the way out.
pub fn install_signal_handlers() -> CancellationToken {
    use tokio::signal::unix::{SignalKind, signal};

    let token = CancellationToken::new();
    let trigger = token.clone();

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers");
                return token;
            }
        };

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
            () = trigger.cancelled() => return,
        }
        trigger.cancel();
    });

    token
}
