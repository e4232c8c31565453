use crate::model::ExitStatus;
use serde::Serialize;
use thiserror::Error;

/// Failure to establish an authenticated remote session.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectError {
    #[error("connection timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("authentication failed: {message}")]
    AuthFailure { message: String },
    #[error("network unreachable: {message}")]
    NetworkUnreachable { message: String },
    #[error("host key rejected: {message}")]
    HostKeyRejected { message: String },
}

impl ConnectError {
    /// Timeouts and unreachable hosts may clear up on their own (an sshd
    /// restart, a VM still booting); credential and host key failures never do.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectError::Timeout { .. } | ConnectError::NetworkUnreachable { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("connection lost while running command {} of {total} `{command}`: {message}", .command_index + 1)]
    ConnectionLost {
        command_index: usize,
        total: usize,
        command: String,
        message: String,
    },
    #[error("command {} of {total} `{command}` {status}", .command_index + 1)]
    CommandRejected {
        command_index: usize,
        total: usize,
        command: String,
        status: ExitStatus,
    },
}

impl ExecutionError {
    pub fn command_index(&self) -> usize {
        match self {
            ExecutionError::ConnectionLost { command_index, .. }
            | ExecutionError::CommandRejected { command_index, .. } => *command_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferError {
    #[error("local path not found: {path} ({message})")]
    LocalNotFound { path: String, message: String },
    #[error("remote write denied: {path} ({message})")]
    RemoteWriteDenied { path: String, message: String },
    #[error("connection lost during transfer: {message}")]
    ConnectionLost { message: String },
}

/// The single failure type carried by a failed `SessionOutcome`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "category", content = "error", rename_all = "snake_case")]
pub enum FailureCause {
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("cancelled")]
    Cancelled,
    #[error("no active connection; add a connect step first")]
    NotConnected,
    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),
}
