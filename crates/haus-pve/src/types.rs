//! Common types for the PVE surface

use serde::{Deserialize, Serialize};

/// Opaque handle for a PVE asynchronous task, used for polling
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Upid(pub String);

impl Upid {
    pub fn new(upid: impl Into<String>) -> Self {
        Self(upid.into())
    }
}

impl std::fmt::Display for Upid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Upid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Status of an asynchronous PVE task
#[derive(Debug, Clone)]
pub struct TaskStatus {
    /// True while the task is still executing
    pub running: bool,
    /// Terminal status string; "OK" on success
    pub exit_status: Option<String>,
}

impl TaskStatus {
    /// True iff the task finished successfully
    pub fn ok(&self) -> bool {
        !self.running && self.exit_status.as_deref() == Some("OK")
    }
}

/// Fully-specified LXC creation parameters
#[derive(Debug, Clone)]
pub struct CreateCtRequest {
    pub vmid: u32,
    pub ostemplate: String,
    pub hostname: String,
    pub memory_mb: u32,
    pub swap_mb: u32,
    pub cores: u16,
    pub storage: String,
    pub disk_gb: u32,
    pub bridge: String,
    /// e.g. "ip=dhcp" or "ip=10.0.0.5/24,gw=10.0.0.1"
    pub ip_config: String,
    pub nameserver: Option<String>,
    pub root_password: String,
    pub ssh_public_key: Option<String>,
    pub unprivileged: bool,
    pub nesting: bool,
    pub keyctl: bool,
    pub fuse: bool,
    pub tags: Vec<String>,
}

impl CreateCtRequest {
    /// Root filesystem descriptor: `<storage>:<sizeGB>`
    pub fn rootfs(&self) -> String {
        format!("{}:{}", self.storage, self.disk_gb)
    }

    /// Network descriptor: `name=eth0,bridge=<br>,<ipConfig>`
    pub fn net0(&self) -> String {
        format!("name=eth0,bridge={},{}", self.bridge, self.ip_config)
    }

    /// LXC features string assembled from the security flags, or None when
    /// no feature is enabled
    pub fn features(&self) -> Option<String> {
        let mut parts = Vec::new();
        if self.nesting {
            parts.push("nesting=1");
        }
        if self.keyctl {
            parts.push("keyctl=1");
        }
        if self.fuse {
            parts.push("fuse=1");
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }

    /// PVE tag list, semicolon-separated
    pub fn tags_param(&self) -> Option<String> {
        if self.tags.is_empty() {
            None
        } else {
            Some(self.tags.join(";"))
        }
    }
}

/// Result of a remote command
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code (-1 when terminated by signal)
    pub exit_code: i64,
    /// Combined stdout/stderr output
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateCtRequest {
        CreateCtRequest {
            vmid: 120,
            ostemplate: "local:vztmpl/debian-12.tar.zst".to_string(),
            hostname: "web01".to_string(),
            memory_mb: 2048,
            swap_mb: 512,
            cores: 2,
            storage: "local-lvm".to_string(),
            disk_gb: 16,
            bridge: "vmbr0".to_string(),
            ip_config: "ip=dhcp".to_string(),
            nameserver: None,
            root_password: "secret".to_string(),
            ssh_public_key: None,
            unprivileged: true,
            nesting: false,
            keyctl: false,
            fuse: false,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_rootfs_descriptor() {
        assert_eq!(request().rootfs(), "local-lvm:16");
    }

    #[test]
    fn test_net0_descriptor() {
        assert_eq!(request().net0(), "name=eth0,bridge=vmbr0,ip=dhcp");
    }

    #[test]
    fn test_features_empty_when_all_disabled() {
        assert_eq!(request().features(), None);
    }

    #[test]
    fn test_features_assembled_from_flags() {
        let mut req = request();
        req.nesting = true;
        req.fuse = true;
        assert_eq!(req.features().as_deref(), Some("nesting=1,fuse=1"));
    }

    #[test]
    fn test_tags_param() {
        let mut req = request();
        assert_eq!(req.tags_param(), None);
        req.tags = vec!["web".to_string(), "prod".to_string()];
        assert_eq!(req.tags_param().as_deref(), Some("web;prod"));
    }

    #[test]
    fn test_task_status_ok() {
        let running = TaskStatus {
            running: true,
            exit_status: None,
        };
        assert!(!running.ok());

        let done = TaskStatus {
            running: false,
            exit_status: Some("OK".to_string()),
        };
        assert!(done.ok());

        let failed = TaskStatus {
            running: false,
            exit_status: Some("command failed".to_string()),
        };
        assert!(!failed.ok());
    }
}
