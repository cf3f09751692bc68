//! Process-wide configuration for infrahaus
//!
//! The environment is read exactly once, at process entry, into a typed
//! `ProcessConfig`. Every component receives its configuration explicitly;
//! nothing below this layer touches `std::env`.

use crate::{ConfigError, Result};
use base64::Engine;
use std::time::Duration;

/// Process configuration assembled from the environment
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Queue / pub-sub endpoint
    pub redis_url: String,
    /// PVE API endpoint and credentials
    pub pve: PveConfig,
    /// 32-byte key for at-rest credential encryption
    pub secret_key: [u8; 32],
    /// Optional git-sync source for the in-container agent
    pub config_repo: Option<ConfigRepo>,
    /// Maximum provisioning jobs in flight per worker
    pub worker_concurrency: usize,
    /// Pipeline timeouts
    pub timeouts: Timeouts,
}

/// PVE connection settings
#[derive(Debug, Clone)]
pub struct PveConfig {
    pub host: String,
    pub port: u16,
    pub auth: PveAuth,
}

/// PVE authentication: root password (ticket auth) or an API token pair
#[derive(Debug, Clone)]
pub enum PveAuth {
    Password { password: String },
    Token { token_id: String, secret: String },
}

/// Git repository the agent syncs its config tree from
#[derive(Debug, Clone)]
pub struct ConfigRepo {
    pub url: String,
    pub branch: String,
}

/// Pipeline timeouts, all overridable from the environment
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// P1: waiting for the create task to finish
    pub create: Duration,
    /// P2: waiting for the start task to finish
    pub start: Duration,
    /// P2: number of 1 s filesystem-ready probes
    pub fs_ready_probes: u32,
    /// Interval between PVE task status polls
    pub task_poll_interval: Duration,
    /// Default per-entry timeout for custom package installs
    pub custom_package: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(120),
            start: Duration::from_secs(60),
            fs_ready_probes: 15,
            task_poll_interval: Duration::from_secs(2),
            custom_package: Duration::from_secs(300),
        }
    }
}

impl ProcessConfig {
    /// Read configuration from the environment.
    ///
    /// Required: `REDIS_URL`, `PVE_HOST`, `HAUS_SECRET_KEY`, and either
    /// `PVE_ROOT_PASSWORD` or the `PVE_TOKEN_ID`/`PVE_TOKEN_SECRET` pair.
    pub fn from_env() -> Result<Self> {
        let redis_url = require("REDIS_URL")?;
        let host = require("PVE_HOST")?;
        let port = optional_parsed("PVE_PORT", 8006u16)?;

        let auth = match std::env::var("PVE_ROOT_PASSWORD") {
            Ok(password) if !password.is_empty() => PveAuth::Password { password },
            _ => {
                let token_id = require("PVE_TOKEN_ID").map_err(|_| {
                    ConfigError::MissingEnv("PVE_ROOT_PASSWORD or PVE_TOKEN_ID/PVE_TOKEN_SECRET")
                })?;
                let secret = require("PVE_TOKEN_SECRET")?;
                PveAuth::Token { token_id, secret }
            }
        };

        let secret_key = decode_secret_key(&require("HAUS_SECRET_KEY")?)?;

        let config_repo = match std::env::var("CONFIG_REPO_URL") {
            Ok(url) if !url.is_empty() => Some(ConfigRepo {
                url,
                branch: std::env::var("CONFIG_BRANCH").unwrap_or_else(|_| "main".to_string()),
            }),
            _ => None,
        };

        let worker_concurrency = optional_parsed("HAUS_WORKER_CONCURRENCY", 2usize)?;

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            create: Duration::from_secs(optional_parsed(
                "HAUS_CREATE_TIMEOUT_SECS",
                defaults.create.as_secs(),
            )?),
            start: Duration::from_secs(optional_parsed(
                "HAUS_START_TIMEOUT_SECS",
                defaults.start.as_secs(),
            )?),
            fs_ready_probes: optional_parsed("HAUS_FS_READY_PROBES", defaults.fs_ready_probes)?,
            task_poll_interval: defaults.task_poll_interval,
            custom_package: Duration::from_secs(optional_parsed(
                "HAUS_CUSTOM_PKG_TIMEOUT_SECS",
                defaults.custom_package.as_secs(),
            )?),
        };

        Ok(Self {
            redis_url,
            pve: PveConfig { host, port, auth },
            secret_key,
            config_repo,
            worker_concurrency,
            timeouts,
        })
    }
}

fn require(name: &'static str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnv(name)),
    }
}

fn optional_parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v.parse().map_err(|_| ConfigError::InvalidEnv {
            name,
            reason: format!("cannot parse {:?}", v),
        }),
        _ => Ok(default),
    }
}

fn decode_secret_key(encoded: &str) -> Result<[u8; 32]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ConfigError::InvalidEnv {
            name: "HAUS_SECRET_KEY",
            reason: format!("not valid base64: {}", e),
        })?;
    bytes
        .try_into()
        .map_err(|_| ConfigError::InvalidEnv {
            name: "HAUS_SECRET_KEY",
            reason: "must decode to exactly 32 bytes".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_secret_key_round_trip() {
        let key = [7u8; 32];
        let encoded = base64::engine::general_purpose::STANDARD.encode(key);
        assert_eq!(decode_secret_key(&encoded).unwrap(), key);
    }

    #[test]
    fn test_decode_secret_key_wrong_length() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(decode_secret_key(&encoded).is_err());
    }

    #[test]
    fn test_decode_secret_key_bad_base64() {
        assert!(decode_secret_key("not base64 !!!").is_err());
    }

    #[test]
    fn test_default_timeouts() {
        let t = Timeouts::default();
        assert_eq!(t.create, Duration::from_secs(120));
        assert_eq!(t.start, Duration::from_secs(60));
        assert_eq!(t.fs_ready_probes, 15);
        assert_eq!(t.custom_package, Duration::from_secs(300));
    }
}
