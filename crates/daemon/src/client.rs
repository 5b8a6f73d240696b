//! Client side of a daemon connection.

use crate::options::DaemonOptions;
use crate::protocol::{DaemonStatus, ErrorCode, Request, Response, read_message, write_message};
use crate::{Error, Result};
use std::time::Duration;
use strata_config::{DaemonPaths, TaskOutputs};
use tokio::net::UnixStream;

/// An open connection to a running daemon.
///
/// Usually obtained from [`crate::Connector`], which also performs the
/// version handshake.
#[derive(Debug)]
pub struct DaemonClient {
    stream: UnixStream,
    request_timeout: Duration,
    paths: DaemonPaths,
}

impl DaemonClient {
    /// Open the daemon socket without any handshake.
    pub async fn connect(paths: &DaemonPaths, options: &DaemonOptions) -> Result<Self> {
        let sock = paths.sock_file.as_path();
        let stream = tokio::time::timeout(options.connect_timeout, UnixStream::connect(sock))
            .await
            .map_err(|_| Error::connection(format!("timed out connecting to {}", sock.display())))?
            .map_err(|e| Error::io(e, sock, "connect"))?;
        Ok(Self {
            stream,
            request_timeout: options.request_timeout,
            paths: paths.clone(),
        })
    }

    /// Files of the daemon this client talks to.
    #[must_use]
    pub fn paths(&self) -> &DaemonPaths {
        &self.paths
    }

    async fn call(&mut self, request: Request) -> Result<Response> {
        let exchange = async {
            write_message(&mut self.stream, &request).await?;
            read_message::<_, Response>(&mut self.stream).await
        };
        let response = tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| Error::connection("request timed out"))?
            .map_err(|e| Error::connection(e.to_string()))?;
        match response {
            Response::Error { code, message } => Err(match code {
                ErrorCode::VersionMismatch => Error::VersionMismatch { message },
                ErrorCode::CookieTimeout => Error::CookieTimeout { message },
                ErrorCode::Closed => Error::WatcherClosed,
                ErrorCode::InvalidRequest | ErrorCode::Internal => Error::Server { message },
            }),
            response => Ok(response),
        }
    }

    /// Perform the version handshake.
    pub async fn hello(&mut self, version: &str) -> Result<()> {
        match self
            .call(Request::Hello {
                version: version.to_string(),
            })
            .await?
        {
            Response::Hello => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the daemon to exit. Returns once the daemon acknowledged.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.call(Request::Shutdown).await? {
            Response::ShuttingDown => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Fetch uptime and file locations.
    pub async fn status(&mut self) -> Result<DaemonStatus> {
        match self.call(Request::Status).await? {
            Response::Status { status } => Ok(status),
            other => Err(unexpected(&other)),
        }
    }

    /// Tell the daemon that the task with `hash` just wrote `outputs`.
    pub async fn notify_outputs_written(&mut self, hash: &str, outputs: &TaskOutputs) -> Result<()> {
        let request = Request::NotifyOutputsWritten {
            hash: hash.to_string(),
            output_globs: outputs.inclusions.clone(),
            output_exclusion_globs: outputs.exclusions.clone(),
        };
        match self.call(request).await? {
            Response::OutputsRecorded => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Which of `globs` changed on disk since they were recorded for `hash`.
    pub async fn get_changed_outputs(&mut self, hash: &str, globs: &[String]) -> Result<Vec<String>> {
        let request = Request::GetChangedOutputs {
            hash: hash.to_string(),
            output_globs: globs.to_vec(),
        };
        match self.call(request).await? {
            Response::ChangedOutputs { globs } => Ok(globs),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> Error {
    Error::Server {
        message: format!("unexpected response: {response:?}"),
    }
}
