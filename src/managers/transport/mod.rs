mod ssh;

pub use ssh::{SshConnection, SshConnector};

use crate::errors::{ConnectError, TransferError};
use crate::model::{ConnectionSpec, ExitStatus};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    pub timeout_ms: Option<u64>,
    pub max_capture_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

/// The link to the host broke (or stalled past its deadline) before the
/// command's exit status was known.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("no exit status within {0} ms")]
    TimedOut(u64),
    #[error("{0}")]
    Broken(String),
}

/// Opens authenticated sessions. Implemented over SSH for real hosts and by
/// in-memory fakes in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Connection>, ConnectError>;
}

/// One open session. Operations are issued one at a time.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Runs `command` to completion. A non-zero exit is `Ok`; only a broken
    /// link is an error.
    async fn exec(&self, command: &str, limits: ExecLimits) -> Result<ExecOutput, LinkError>;

    /// Creates `remote_dir` and its missing parents. Existing directories are fine.
    async fn create_dir_all(&self, remote_dir: &str) -> Result<(), TransferError>;

    /// Writes the local file to `remote_path`, replacing any existing file.
    /// Returns the number of bytes written.
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        chunk_size: usize,
    ) -> Result<u64, TransferError>;

    /// Releases the session. Safe to call more than once.
    async fn close(&self);
}
