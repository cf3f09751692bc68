//! Error types for the PVE client and shell channel

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PveError {
    #[error("Cannot connect to PVE API: {0}")]
    ConnectionError(String),

    #[error("PVE authentication failed: {0}")]
    AuthFailed(String),

    #[error("PVE API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected PVE API response: {0}")]
    InvalidResponse(String),

    #[error("Task {0} did not finish in time")]
    TaskTimeout(String),

    #[error("Task {upid} failed: {exit_status}")]
    TaskFailed { upid: String, exit_status: String },

    #[error("Remote command failed: {0}")]
    ExecError(String),

    #[error("Shell channel is closed")]
    ChannelClosed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PveError>;
