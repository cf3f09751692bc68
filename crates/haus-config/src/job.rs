//! Provisioning job payloads — the queue contract
//!
//! Jobs are JSON on the wire, camelCase field names. The worker deserializes
//! and validates at intake; an invalid payload fails the job before any
//! lifecycle transition.

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};

/// A container creation job popped from the provisioning queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerCreationJob {
    pub container_id: String,
    pub node_name: String,
    pub template_id: Option<String>,
    pub config: JobConfig,
    /// Package buckets the wizard enabled (e.g. "npm", "pip")
    #[serde(default)]
    pub enabled_buckets: Vec<String>,
    /// Free-text extra packages for the native manager
    #[serde(default)]
    pub additional_packages: Vec<String>,
    /// Per-script enable overrides from the wizard
    #[serde(default)]
    pub scripts: Vec<ScriptSelection>,
}

/// Fully-resolved container creation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub hostname: String,
    pub vmid: u32,
    pub memory_mb: u32,
    pub swap_mb: u32,
    pub cores: u16,
    pub disk_gb: u32,
    pub storage: String,
    pub bridge: String,
    /// e.g. "ip=dhcp" or "ip=10.0.0.5/24,gw=10.0.0.1"
    pub ip_config: String,
    pub nameserver: Option<String>,
    pub root_password: String,
    pub ssh_public_key: Option<String>,
    pub unprivileged: bool,
    pub nesting: bool,
    pub ostemplate: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Wizard-level script selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSelection {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub order: i32,
}

impl ContainerCreationJob {
    /// Validate the payload at intake
    pub fn validate(&self) -> Result<()> {
        if self.container_id.is_empty() {
            return Err(ConfigError::InvalidJob("containerId is empty".to_string()));
        }
        if self.node_name.is_empty() {
            return Err(ConfigError::InvalidJob("nodeName is empty".to_string()));
        }
        if self.config.hostname.is_empty() {
            return Err(ConfigError::InvalidJob("hostname is empty".to_string()));
        }
        if self.config.vmid < 100 {
            return Err(ConfigError::InvalidJob(format!(
                "vmid {} is below the PVE minimum of 100",
                self.config.vmid
            )));
        }
        if self.config.ostemplate.is_empty() {
            return Err(ConfigError::InvalidJob("ostemplate is empty".to_string()));
        }
        if self.config.root_password.is_empty() {
            return Err(ConfigError::InvalidJob("rootPassword is empty".to_string()));
        }
        Ok(())
    }

    /// Scripts the wizard left enabled, ascending `(order, name)`
    pub fn selected_scripts(&self) -> Vec<&ScriptSelection> {
        let mut selected: Vec<&ScriptSelection> =
            self.scripts.iter().filter(|s| s.enabled).collect();
        selected.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        selected
    }
}
