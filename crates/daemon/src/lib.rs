//! Per-repository background daemon for strata.
//!
//! One daemon serves one repository over a Unix socket. It keeps a file
//! watcher running so that clients can ask which task outputs changed on
//! disk since they were written, without rescanning. Clients reach it
//! through a [`Connector`], which starts the daemon on demand, performs the
//! version handshake and reclaims the files of a daemon that died.
//!
//! Unix only: the transport is a Unix socket and liveness checks use signals.

#![cfg(unix)]

mod client;
mod connector;
mod error;
mod lifecycle;
mod options;
pub mod protocol;
mod server;

pub use client::DaemonClient;
pub use connector::{Connector, read_pid};
pub use error::{Error, Result};
pub use lifecycle::{ServerConfig, run_daemon};
pub use options::DaemonOptions;
pub use protocol::{DaemonStatus, ErrorCode, Request, Response};
pub use server::{RepoRootMonitor, ServerContext};
