//! Error types for configuration parsing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    InvalidEnv { name: &'static str, reason: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid job payload: {0}")]
    InvalidJob(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
