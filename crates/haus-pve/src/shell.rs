//! Remote shell channel into a container
//!
//! Commands are typed argv lists; all quoting happens here, in the transport.
//! The primary mode tunnels through the PVE host's container-exec facility
//! (`pct exec`), which needs no credentials inside the container. The fallback
//! mode connects directly to the container over SSH and requires its IP and
//! root password.

use crate::{ExecOutput, PveError, Result};
use async_trait::async_trait;
use base64::Engine;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// A command to run inside the container, carried as an argv list
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
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

    /// A shell expression run via `sh -c`
    pub fn script(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Render the argv as a single shell-safe string
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(shell_quote(&self.program));
        for arg in &self.args {
            parts.push(shell_quote(arg));
        }
        parts.join(" ")
    }
}

/// Single-quote a string for the POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Trait for the remote shell channel into a container
#[async_trait]
pub trait ContainerShell: Send + Sync {
    /// Run a command and collect its combined output
    async fn run(&self, cmd: &ShellCommand) -> Result<ExecOutput>;

    /// Run a command, streaming combined output line by line into `tx`.
    ///
    /// The channel is bounded; a slow consumer backpressures the remote
    /// reader. Closing the receiver cancels the command.
    async fn run_streamed(&self, cmd: &ShellCommand, tx: mpsc::Sender<String>) -> Result<i64>;

    /// Write a file inside the container, creating parent directories
    async fn write_file(&self, path: &str, content: &[u8], mode: &str) -> Result<()>;

    /// Read a file from the container
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// List directory entries (names only); missing directory yields an
    /// empty list
    async fn list_dir(&self, path: &str) -> Result<Vec<String>>;

    /// Close the channel. Further calls fail with `ChannelClosed`.
    async fn close(&self);
}

/// How the SSH transport reaches the container
#[derive(Debug, Clone)]
pub enum ShellMode {
    /// Through the PVE host: `ssh root@<pve> pct exec <vmid> -- ...`
    Pct { pve_host: String, vmid: u32 },
    /// Directly to the container: requires IP and root password
    Direct { host: String, password: String },
}

/// SSH-backed shell channel
pub struct SshShell {
    mode: ShellMode,
    closed: AtomicBool,
}

// Base64 payloads are chunked so a single remote command line stays well
// under ARG_MAX even with the double relay.
const WRITE_CHUNK: usize = 48 * 1024;

impl SshShell {
    /// Primary mode: tunnel through the PVE host's container-exec facility
    pub fn pct(pve_host: impl Into<String>, vmid: u32) -> Self {
        Self {
            mode: ShellMode::Pct {
                pve_host: pve_host.into(),
                vmid,
            },
            closed: AtomicBool::new(false),
        }
    }

    /// Fallback mode: direct SSH to the container
    pub fn direct(host: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            mode: ShellMode::Direct {
                host: host.into(),
                password: password.into(),
            },
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PveError::ChannelClosed)
        } else {
            Ok(())
        }
    }

    /// Build the local ssh argv that runs `script` inside the container with
    /// stderr merged into stdout
    fn ssh_argv(&self, script: &str) -> Vec<String> {
        let merged = format!("{{ {}; }} 2>&1", script);
        match &self.mode {
            ShellMode::Pct { pve_host, vmid } => vec![
                "ssh".to_string(),
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-o".to_string(),
                "StrictHostKeyChecking=accept-new".to_string(),
                format!("root@{}", pve_host),
                format!("pct exec {} -- sh -c {}", vmid, shell_quote(&merged)),
            ],
            ShellMode::Direct { host, password } => vec![
                "sshpass".to_string(),
                "-p".to_string(),
                password.clone(),
                "ssh".to_string(),
                "-o".to_string(),
                "StrictHostKeyChecking=accept-new".to_string(),
                format!("root@{}", host),
                format!("sh -c {}", shell_quote(&merged)),
            ],
        }
    }

    fn spawn(&self, script: &str, want_stdin: bool) -> Result<tokio::process::Child> {
        let argv = self.ssh_argv(script);
        tracing::trace!("remote exec: {}", script);
        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if want_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        command.spawn().map_err(PveError::Io)
    }
}

#[async_trait]
impl ContainerShell for SshShell {
    async fn run(&self, cmd: &ShellCommand) -> Result<ExecOutput> {
        self.ensure_open()?;
        let mut child = self.spawn(&cmd.render(), cmd.stdin.is_some())?;

        if let Some(ref stdin_data) = cmd.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(stdin_data).await?;
                stdin.shutdown().await?;
            }
        }

        let output = child.wait_with_output().await?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ExecOutput {
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
            output: combined,
        })
    }

    async fn run_streamed(&self, cmd: &ShellCommand, tx: mpsc::Sender<String>) -> Result<i64> {
        self.ensure_open()?;
        let mut child = self.spawn(&cmd.render(), false)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PveError::ExecError("no stdout handle".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        while let Some(line) = lines.next_line().await? {
            if tx.send(line).await.is_err() {
                // Receiver dropped: treat as cancellation
                let _ = child.kill().await;
                return Err(PveError::Cancelled);
            }
        }

        let status = child.wait().await?;
        Ok(status.code().map(i64::from).unwrap_or(-1))
    }

    async fn write_file(&self, path: &str, content: &[u8], mode: &str) -> Result<()> {
        self.ensure_open()?;

        let parent = std::path::Path::new(path)
            .parent()
            .map(|p| p.display().to_string())
            .filter(|p| !p.is_empty());

        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        let mut chunks = encoded
            .as_bytes()
            .chunks(WRITE_CHUNK)
            .map(|c| std::str::from_utf8(c).expect("base64 is ascii"));

        let first = chunks.next().unwrap_or("");
        let mut script = String::new();
        if let Some(ref parent) = parent {
            script.push_str(&format!("mkdir -p {} && ", shell_quote(parent)));
        }
        script.push_str(&format!(
            "printf '%s' '{}' | base64 -d > {}",
            first,
            shell_quote(path)
        ));
        self.run_checked(&script).await?;

        for chunk in chunks {
            let append = format!(
                "printf '%s' '{}' | base64 -d >> {}",
                chunk,
                shell_quote(path)
            );
            self.run_checked(&append).await?;
        }

        self.run_checked(&format!("chmod {} {}", mode, shell_quote(path)))
            .await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let output = self
            .run(&ShellCommand::script(format!(
                "base64 < {}",
                shell_quote(path)
            )))
            .await?;
        if !output.success() {
            return Err(PveError::ExecError(format!(
                "cannot read {}: {}",
                path,
                output.output.trim()
            )));
        }
        let stripped: String = output.output.split_whitespace().collect();
        base64::engine::general_purpose::STANDARD
            .decode(stripped)
            .map_err(|e| PveError::ExecError(format!("invalid base64 from {}: {}", path, e)))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        let output = self
            .run(&ShellCommand::script(format!(
                "ls -1 {}",
                shell_quote(path)
            )))
            .await?;
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(output
            .output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl SshShell {
    async fn run_checked(&self, script: &str) -> Result<()> {
        let output = self.run(&ShellCommand::script(script)).await?;
        if !output.success() {
            return Err(PveError::ExecError(format!(
                "remote command exited {}: {}",
                output.exit_code,
                output.output.trim()
            )));
        }
        Ok(())
    }
}
