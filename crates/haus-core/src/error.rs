//! Error types for haus-core
//!
//! The taxonomy matters for propagation: configuration errors fail a job at
//! intake, infrastructure and state errors are fatal, remote exec errors are
//! fatal or warnings depending on the phase, and validation errors are
//! logged and skipped.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] haus_config::ConfigError),

    #[error("PVE error: {0}")]
    Pve(#[from] haus_pve::PveError),

    #[error("Remote command failed: {0}")]
    RemoteExec(String),

    #[error("Script \"{name}\" failed with exit code {code}")]
    ScriptFailed { name: String, code: i64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Queue error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// The short message surfaced to end users. Detail stays in the
    /// persistent logs; network-classified failures collapse to a generic
    /// "Unable to reach host".
    pub fn user_message(&self) -> String {
        use haus_pve::PveError;
        match self {
            CoreError::Pve(PveError::ConnectionError(_))
            | CoreError::Pve(PveError::Api { .. })
            | CoreError::Pve(PveError::TaskTimeout(_))
            | CoreError::Redis(_) => "Unable to reach host".to_string(),
            CoreError::Cancelled => "cancelled".to_string(),
            CoreError::ScriptFailed { .. } => self.to_string(),
            CoreError::Config(e) => format!("Invalid configuration: {}", e),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
