//! Wire protocol between clients and the daemon.
//!
//! Messages are framed as length-prefixed JSON:
//! - 4 bytes: big-endian message length
//! - N bytes: JSON payload
//!
//! Every request gets exactly one response on the same connection.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum message size (1MB).
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Client to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Version handshake; must match exactly.
    Hello {
        /// Client version
        version: String,
    },
    /// Stop the daemon.
    Shutdown,
    /// Report uptime and file locations.
    Status,
    /// A task with `hash` just wrote outputs matching these globs.
    NotifyOutputsWritten {
        /// Task hash
        hash: String,
        /// Repository-relative inclusion globs
        output_globs: Vec<String>,
        /// Repository-relative exclusion globs
        output_exclusion_globs: Vec<String>,
    },
    /// Which of these globs changed since they were written for `hash`?
    GetChangedOutputs {
        /// Task hash
        hash: String,
        /// Candidate globs
        output_globs: Vec<String>,
    },
}

/// Daemon to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Handshake accepted.
    Hello,
    /// Shutdown has begun; the daemon exits once this is delivered.
    ShuttingDown,
    /// Current status.
    Status {
        /// The status
        status: DaemonStatus,
    },
    /// Outputs are now tracked.
    OutputsRecorded,
    /// Globs that changed.
    ChangedOutputs {
        /// Subset of the candidates
        globs: Vec<String>,
    },
    /// The request failed.
    Error {
        /// Category
        code: ErrorCode,
        /// Human-readable detail
        message: String,
    },
}

/// Error categories a client can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Hello with a different version
    VersionMismatch,
    /// The file watcher lagged; retry
    CookieTimeout,
    /// The file watcher stopped
    Closed,
    /// Malformed arguments, e.g. an invalid glob
    InvalidRequest,
    /// Anything else
    Internal,
}

/// Daemon status as reported by `Status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    /// Milliseconds since the daemon started
    pub uptime_ms: u64,
    /// Daemon log file
    pub log_file: PathBuf,
    /// Pid file
    pub pid_file: PathBuf,
    /// Socket
    pub sock_file: PathBuf,
}

/// Write one framed message.
///
/// # Errors
///
/// Returns an error if serialization or I/O fails, or the message is too
/// large.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json =
        serde_json::to_vec(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(json.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "message too large"))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&json).await?;
    writer.flush().await
}

/// Read one framed message.
///
/// A peer that closed the connection between messages shows up as
/// [`io::ErrorKind::UnexpectedEof`].
///
/// # Errors
///
/// Returns an error if I/O or deserialization fails, or the announced length
/// exceeds [`MAX_MESSAGE_SIZE`].
pub async fn read_message<R, T>(reader: &mut R) -> io::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "message too large",
        ));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;

    serde_json::from_slice(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
