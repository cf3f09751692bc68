//! Error types for the configuration manager

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Cannot detect OS or package manager: {0}")]
    DetectFailed(String),

    #[error("Command {0:?} not found")]
    CommandNotFound(String),

    #[error("Package command failed: {0}")]
    PackageCommand(String),

    #[error("Command timed out after {seconds}s: {command}")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("Script \"{name}\" failed with exit code {code}")]
    ScriptFailed { name: String, code: i64 },

    #[error("Failed to apply {path}: {reason}")]
    FileApplyFailed { path: String, reason: String },

    #[error("Git sync failed: {0}")]
    GitSync(String),

    #[error("State file corrupted: {0}")]
    StateCorrupted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
