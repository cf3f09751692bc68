//! Deployed agent assets
//!
//! The deploy phase pushes three generated artifacts into the container: the
//! agent environment file, the sync driver script, and the service unit that
//! runs it.

use haus_config::ConfigRepo;

/// Remote path of the agent environment file
pub const CONFIG_ENV_PATH: &str = "/etc/config-manager/config.env";
/// Remote path of the sync driver script
pub const SYNC_DRIVER_PATH: &str = "/usr/local/bin/haus-sync";
/// Remote path of the agent service unit
pub const AGENT_UNIT_PATH: &str = "/etc/systemd/system/haus-agent.service";
/// Remote config tree root
pub const REMOTE_CONFIG_ROOT: &str = "/etc/config-manager/tree";

/// Directories created inside the container during deploy
pub const REMOTE_DIRS: &[&str] = &[
    "/etc/config-manager",
    "/etc/infrahaus/credentials",
    "/var/log/config-manager",
];

/// Render config.env for a container
pub fn config_env(
    repo: Option<&ConfigRepo>,
    template_name: &str,
    container_id: &str,
) -> String {
    let (repo_url, branch) = match repo {
        Some(repo) => (repo.url.as_str(), repo.branch.as_str()),
        None => ("", "main"),
    };
    format!(
        "CONFIG_REPO_URL={}\nCONFIG_BRANCH={}\nCONFIG_PATH={}\nTEMPLATE_NAME={}\nCONTAINER_ID={}\n",
        repo_url, branch, REMOTE_CONFIG_ROOT, template_name, container_id
    )
}

/// The sync driver script: sources config.env and invokes the agent
pub fn sync_driver_script() -> String {
    format!(
        r#"#!/bin/sh
set -eu

. {env_path}

ARGS="sync --config-root $CONFIG_PATH"
if [ -n "${{CONFIG_REPO_URL:-}}" ]; then
    ARGS="$ARGS --repo-url $CONFIG_REPO_URL --branch ${{CONFIG_BRANCH:-main}}"
fi

exec haus-agent $ARGS
"#,
        env_path = CONFIG_ENV_PATH
    )
}

/// The systemd unit for the agent (oneshot, run on demand and at boot)
pub fn agent_unit() -> String {
    format!(
        r#"[Unit]
Description=infrahaus configuration manager sync
After=network-online.target
Wants=network-online.target

[Service]
Type=oneshot
ExecStart={driver}
StandardOutput=journal
StandardError=journal

[Install]
WantedBy=multi-user.target
"#,
        driver = SYNC_DRIVER_PATH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_env_with_repo() {
        let repo = ConfigRepo {
            url: "https://git.example/t.git".to_string(),
            branch: "stable".to_string(),
        };
        let env = config_env(Some(&repo), "web", "c-1");
        assert!(env.contains("CONFIG_REPO_URL=https://git.example/t.git\n"));
        assert!(env.contains("CONFIG_BRANCH=stable\n"));
        assert!(env.contains("TEMPLATE_NAME=web\n"));
        assert!(env.contains("CONTAINER_ID=c-1\n"));
    }

    #[test]
    fn test_config_env_without_repo() {
        let env = config_env(None, "web", "c-1");
        assert!(env.contains("CONFIG_REPO_URL=\n"));
        assert!(env.contains("CONFIG_BRANCH=main\n"));
    }

    #[test]
    fn test_driver_script_sources_env() {
        let script = sync_driver_script();
        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains(CONFIG_ENV_PATH));
        assert!(script.contains("exec haus-agent"));
    }

    #[test]
    fn test_unit_runs_driver() {
        let unit = agent_unit();
        assert!(unit.contains("Type=oneshot"));
        assert!(unit.contains(SYNC_DRIVER_PATH));
    }
}
