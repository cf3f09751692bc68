//! npm handler (global packages)
//!
//! The existence check must not substring-match: `react` installed is a
//! different fact from `react-dom` installed. The primary check reads the
//! JSON listing; a narrow tree-pattern match is the fallback when the JSON
//! is unparseable.

use super::PackageHandler;
use crate::{strip_version, AgentError, Cmd, CommandRunner, Result};
use async_trait::async_trait;
use haus_config::PackageManagerKind;
use std::sync::Arc;

pub struct NpmHandler {
    runner: Arc<dyn CommandRunner>,
}

impl NpmHandler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

/// Strip version constraints: `pkg@1.2` → `pkg`, keeping scoped names
/// (`@scope/pkg@next` → `@scope/pkg`) intact
fn base_name(name: &str) -> &str {
    let name = strip_version(name);
    if name.len() <= 1 {
        return name;
    }
    match name[1..].find('@') {
        Some(idx) => &name[..idx + 1],
        None => name,
    }
}

#[async_trait]
impl PackageHandler for NpmHandler {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Npm
    }

    async fn available(&self) -> bool {
        self.runner.has_command("npm") && self.runner.has_command("node")
    }

    async fn update_index(&self) -> Result<()> {
        // npm has no local metadata cache to refresh
        Ok(())
    }

    async fn is_installed(&self, name: &str) -> Result<bool> {
        let name = base_name(name);
        let out = self
            .runner
            .run(
                &Cmd::new("npm")
                    .args(["ls", "-g", "--depth=0", "--json"])
                    .arg(name),
            )
            .await?;

        // Exact key lookup in the dependency object; never a substring match
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&out.stdout) {
            return Ok(value
                .get("dependencies")
                .and_then(|deps| deps.get(name))
                .is_some());
        }

        // Fallback: the human-readable tree prints one `── name@version`
        // entry per match
        let out = self
            .runner
            .run(&Cmd::new("npm").args(["ls", "-g", "--depth=0"]).arg(name))
            .await?;
        let needle = format!("── {}@", name);
        Ok(out.stdout.lines().any(|line| line.contains(&needle)))
    }

    async fn install(&self, names: &[String]) -> Result<()> {
        let out = self
            .runner
            .run_streamed(
                &Cmd::new("npm")
                    .args(["install", "-g"])
                    .args(names.iter().cloned()),
            )
            .await?;
        if out.success() {
            Ok(())
        } else {
            Err(AgentError::PackageCommand(format!(
                "npm install exited {}",
                out.exit_code
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("react"), "react");
        assert_eq!(base_name("react@18"), "react");
        assert_eq!(base_name("@types/node"), "@types/node");
        assert_eq!(base_name("@types/node@20"), "@types/node");
        assert_eq!(base_name("typescript=5.*"), "typescript");
    }

    #[tokio::test]
    async fn test_substring_sibling_is_not_a_match() {
        // System has react-dom but not react: the JSON listing for `react`
        // has no `react` dependency key
        let json = r#"{"name":"lib","dependencies":{"react-dom":{"version":"18.2.0"}}}"#;
        let runner =
            Arc::new(ScriptedRunner::new().on("npm ls -g --depth=0 --json react", 1, json));
        let handler = NpmHandler::new(runner);
        assert!(!handler.is_installed("react").await.unwrap());
    }

    #[tokio::test]
    async fn test_exact_match_found() {
        let json = r#"{"dependencies":{"react":{"version":"18.2.0"}}}"#;
        let runner =
            Arc::new(ScriptedRunner::new().on("npm ls -g --depth=0 --json react", 0, json));
        let handler = NpmHandler::new(runner);
        assert!(handler.is_installed("react").await.unwrap());
    }

    #[tokio::test]
    async fn test_tree_fallback_when_json_unparseable() {
        let tree = "/usr/lib\n└── react@18.2.0\n";
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("npm ls -g --depth=0 --json react", 0, "npm WARN not json")
                .on("npm ls -g --depth=0 react", 0, tree),
        );
        let handler = NpmHandler::new(runner);
        assert!(handler.is_installed("react").await.unwrap());
    }

    #[tokio::test]
    async fn test_tree_fallback_rejects_substring() {
        let tree = "/usr/lib\n└── react-dom@18.2.0\n";
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("npm ls -g --depth=0 --json react", 0, "garbage output")
                .on("npm ls -g --depth=0 react", 1, tree),
        );
        let handler = NpmHandler::new(runner);
        assert!(!handler.is_installed("react").await.unwrap());
    }

    #[tokio::test]
    async fn test_available_requires_node_toolchain() {
        let npm_only = Arc::new(ScriptedRunner::new().with_command("npm"));
        assert!(!NpmHandler::new(npm_only).available().await);

        let both = Arc::new(ScriptedRunner::new().with_command("npm").with_command("node"));
        assert!(NpmHandler::new(both).available().await);
    }
}
