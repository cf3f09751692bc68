//! Local command execution for the agent
//!
//! All phases run commands through the `CommandRunner` trait so the sync
//! engine and the package handlers can be exercised against a scripted
//! runner in tests.

use crate::{AgentError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// A local command: program, argv, environment, optional timeout
#[derive(Debug, Clone, Default)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// A shell expression run via `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Human-readable form for logs and errors
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Output of a finished local command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for local process execution
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing output
    async fn run(&self, cmd: &Cmd) -> Result<CommandOutput>;

    /// Run to completion, emitting each output line to the sync log as it
    /// arrives, and capturing the combined output
    async fn run_streamed(&self, cmd: &Cmd) -> Result<CommandOutput>;

    /// Check whether an executable exists on PATH
    fn has_command(&self, name: &str) -> bool;
}

/// Runner backed by real local processes
pub struct SystemRunner;

impl SystemRunner {
    fn build(cmd: &Cmd) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&cmd.program);
        command.args(&cmd.args).kill_on_drop(true);
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        command
    }

    async fn wait_with_timeout<T>(
        cmd: &Cmd,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match cmd.timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut).await.map_err(|_| {
                AgentError::CommandTimeout {
                    command: cmd.display(),
                    seconds: timeout.as_secs(),
                }
            })?,
            None => fut.await,
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &Cmd) -> Result<CommandOutput> {
        let run = async {
            let output = Self::build(cmd)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .stdin(Stdio::null())
                .output()
                .await?;
            Ok(CommandOutput {
                exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        };
        Self::wait_with_timeout(cmd, run).await
    }

    async fn run_streamed(&self, cmd: &Cmd) -> Result<CommandOutput> {
        let run = async {
            let mut child = Self::build(cmd)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .stdin(Stdio::null())
                .spawn()?;

            let stdout = child.stdout.take().expect("stdout was piped");
            let stderr = child.stderr.take().expect("stderr was piped");

            let stderr_task = tokio::spawn(async move {
                let mut collected = String::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(target: "sync", "{}", line);
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            });

            let mut collected_out = String::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                tracing::info!(target: "sync", "{}", line);
                collected_out.push_str(&line);
                collected_out.push('\n');
            }

            let status = child.wait().await?;
            let collected_err = stderr_task.await.unwrap_or_default();

            Ok(CommandOutput {
                exit_code: status.code().map(i64::from).unwrap_or(-1),
                stdout: collected_out,
                stderr: collected_err,
            })
        };
        Self::wait_with_timeout(cmd, run).await
    }

    fn has_command(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_builder() {
        let cmd = Cmd::new("apt-get")
            .arg("install")
            .args(["-y", "curl"])
            .env("DEBIAN_FRONTEND", "noninteractive")
            .timeout(Duration::from_secs(30));
        assert_eq!(cmd.display(), "apt-get install -y curl");
        assert_eq!(cmd.env.len(), 1);
        assert_eq!(cmd.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_shell_cmd() {
        let cmd = Cmd::shell("echo hi");
        assert_eq!(cmd.program, "sh");
        assert_eq!(cmd.args, vec!["-c", "echo hi"]);
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let runner = SystemRunner;
        let out = runner.run(&Cmd::shell("printf ok")).await.unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout, "ok");
    }

    #[tokio::test]
    async fn test_system_runner_nonzero_exit() {
        let runner = SystemRunner;
        let out = runner.run(&Cmd::shell("exit 3")).await.unwrap();
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn test_system_runner_timeout() {
        let runner = SystemRunner;
        let cmd = Cmd::shell("sleep 5").timeout(Duration::from_millis(50));
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, AgentError::CommandTimeout { .. }));
    }
}
