//! Template records — the declarative description of a container's desired state
//!
//! Templates are authored elsewhere; from this crate's perspective they are a
//! read-only catalog, deserialized from JSON.

use crate::{ConfigError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

fn package_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9@/_.:~+=*<>-]+$").expect("valid regex"))
}

/// Validate a package name against the allowed character set. Invalid names
/// are never passed to an underlying package tool.
pub fn is_valid_package_name(name: &str) -> bool {
    package_name_re().is_match(name)
}

/// Strip a version suffix: `nodejs=24.*` → `nodejs`, `libfoo>=2` → `libfoo`
pub fn strip_version(name: &str) -> &str {
    match name.find(['=', '<', '>']) {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// A provisioning template
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    /// Hint for choosing an ostemplate ("debian", "alpine", ...)
    pub os_hint: Option<String>,
    #[serde(default)]
    pub resource_defaults: ResourceDefaults,
    #[serde(default)]
    pub security_flags: SecurityFlags,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub scripts: Vec<Script>,
    #[serde(default)]
    pub files: Vec<ManagedFile>,
}

/// Default container sizing applied when the wizard leaves fields blank
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefaults {
    pub cores: u16,
    pub memory_mb: u32,
    pub swap_mb: u32,
    pub disk_gb: u32,
    pub storage: String,
    pub bridge: String,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self {
            cores: 2,
            memory_mb: 1024,
            swap_mb: 512,
            disk_gb: 8,
            storage: "local-lvm".to_string(),
            bridge: "vmbr0".to_string(),
        }
    }
}

/// LXC security feature toggles
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityFlags {
    pub unprivileged: bool,
    pub nesting: bool,
    pub keyctl: bool,
    pub fuse: bool,
}

impl Default for SecurityFlags {
    fn default() -> Self {
        Self {
            unprivileged: true,
            nesting: false,
            keyctl: false,
            fuse: false,
        }
    }
}

/// A package to install, tagged with its ecosystem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    pub manager: PackageManagerKind,
    pub version: Option<String>,
}

/// Package ecosystem tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Apt,
    Apk,
    Dnf,
    Npm,
    Pip,
    Custom,
}

impl std::fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Apt => "apt",
            Self::Apk => "apk",
            Self::Dnf => "dnf",
            Self::Npm => "npm",
            Self::Pip => "pip",
            Self::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

impl PackageManagerKind {
    /// The package-file extension this ecosystem reads (`*.apt`, `*.npm`, ...)
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Apk => "apk",
            Self::Dnf => "dnf",
            Self::Npm => "npm",
            Self::Pip => "pip",
            Self::Custom => "custom",
        }
    }

    /// True for the distro-native ecosystems that require OS detection
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Apt | Self::Apk | Self::Dnf)
    }
}

/// An ordered setup script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub name: String,
    pub order: i32,
    pub content: String,
    pub enabled: bool,
    pub description: Option<String>,
}

/// A file applied to the container under a write policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedFile {
    pub name: String,
    pub target_path: String,
    pub policy: FilePolicy,
    pub content: String,
}

/// Managed-file write policy. Values are case-sensitive on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilePolicy {
    /// Always overwrite
    Replace,
    /// Write only if the destination does not exist
    Default,
    /// Write if differing, preserving the prior version
    Backup,
}

impl Template {
    /// Validate the template invariants:
    /// scripts have unique names and distinct orders; files are unique per
    /// `(target_path, name)`.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut orders = HashSet::new();
        for script in &self.scripts {
            if !names.insert(script.name.as_str()) {
                return Err(ConfigError::InvalidTemplate(format!(
                    "duplicate script name {:?}",
                    script.name
                )));
            }
            if !orders.insert(script.order) {
                return Err(ConfigError::InvalidTemplate(format!(
                    "duplicate script order {} ({:?})",
                    script.order, script.name
                )));
            }
        }

        let mut file_keys = HashSet::new();
        for file in &self.files {
            if !file_keys.insert((file.target_path.as_str(), file.name.as_str())) {
                return Err(ConfigError::InvalidTemplate(format!(
                    "duplicate managed file {}/{}",
                    file.target_path, file.name
                )));
            }
        }

        Ok(())
    }

    /// Enabled scripts in execution order: ascending `order`, ties broken by
    /// `name`.
    pub fn ordered_scripts(&self) -> Vec<&Script> {
        let mut scripts: Vec<&Script> = self.scripts.iter().filter(|s| s.enabled).collect();
        scripts.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        scripts
    }

    /// Packages belonging to the given ecosystem
    pub fn packages_for(&self, kind: PackageManagerKind) -> Vec<&Package> {
        self.packages.iter().filter(|p| p.manager == kind).collect()
    }
}

impl Script {
    /// The on-disk filename in the config tree: `NN-<name>.sh`
    pub fn file_name(&self) -> String {
        format!("{:02}-{}.sh", self.order, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(name: &str, order: i32) -> Script {
        Script {
            name: name.to_string(),
            order,
            content: "#!/bin/sh\n".to_string(),
            enabled: true,
            description: None,
        }
    }

    #[test]
    fn test_validate_ok() {
        let template = Template {
            scripts: vec![script("base", 10), script("finish", 20)],
            ..Default::default()
        };
        assert!(template.validate().is_ok());
    }

    #[test]
    fn test_validate_duplicate_script_name() {
        let template = Template {
            scripts: vec![script("base", 10), script("base", 20)],
            ..Default::default()
        };
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_script_order() {
        let template = Template {
            scripts: vec![script("a", 10), script("b", 10)],
            ..Default::default()
        };
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_file_key() {
        let file = ManagedFile {
            name: "foo.conf".to_string(),
            target_path: "/etc".to_string(),
            policy: FilePolicy::Replace,
            content: String::new(),
        };
        let template = Template {
            files: vec![file.clone(), file],
            ..Default::default()
        };
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_ordered_scripts_by_order_then_name() {
        let mut late = script("a-late", 20);
        late.enabled = true;
        let template = Template {
            scripts: vec![late, script("z-early", 10), script("b", 15)],
            ..Default::default()
        };
        let ordered: Vec<&str> = template
            .ordered_scripts()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(ordered, vec!["z-early", "b", "a-late"]);
    }

    #[test]
    fn test_ordered_scripts_skips_disabled() {
        let mut disabled = script("skipped", 5);
        disabled.enabled = false;
        let template = Template {
            scripts: vec![disabled, script("kept", 10)],
            ..Default::default()
        };
        let ordered = template.ordered_scripts();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].name, "kept");
    }

    #[test]
    fn test_script_file_name_zero_pads() {
        assert_eq!(script("base", 5).file_name(), "05-base.sh");
        assert_eq!(script("base", 40).file_name(), "40-base.sh");
    }

    #[test]
    fn test_policy_wire_format_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&FilePolicy::Backup).unwrap(),
            "\"backup\""
        );
        let parsed: FilePolicy = serde_json::from_str("\"replace\"").unwrap();
        assert_eq!(parsed, FilePolicy::Replace);
        // Case-sensitive: capitalized values are rejected
        assert!(serde_json::from_str::<FilePolicy>("\"Backup\"").is_err());
    }

    #[test]
    fn test_template_json_round_trip() {
        let json = r#"{
            "id": "tmpl-1",
            "name": "web",
            "osHint": "debian",
            "packages": [{"name": "curl", "manager": "apt", "version": null}],
            "scripts": [{"name": "base", "order": 10, "content": "true", "enabled": true, "description": null}],
            "files": [{"name": "motd", "targetPath": "/etc", "policy": "default", "content": "hi"}]
        }"#;
        let template: Template = serde_json::from_str(json).unwrap();
        assert_eq!(template.name, "web");
        assert_eq!(template.packages[0].manager, PackageManagerKind::Apt);
        assert_eq!(template.files[0].policy, FilePolicy::Default);
        assert!(template.validate().is_ok());
    }
}
