//! Test support utilities for haus-core
//!
//! Provides recording mocks for the PVE client and the container shell so
//! the pipeline can be exercised without a hypervisor.

use crate::ShellFactory;
use async_trait::async_trait;
use haus_pve::{
    ContainerShell, CreateCtRequest, ExecOutput, PveClient, PveError, Result as PveResult,
    ShellCommand, TaskStatus, Upid,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Records which methods were called on the mock PVE client
#[derive(Debug, Clone, PartialEq)]
pub enum PveCall {
    CreateCt { vmid: u32 },
    StartCt { vmid: u32 },
    TaskStatus { upid: String },
    Ping,
}

/// Configurable mock PVE client
pub struct MockPve {
    pub calls: Arc<Mutex<Vec<PveCall>>>,
    pub create_result: Arc<Mutex<PveResult<Upid>>>,
    pub start_result: Arc<Mutex<PveResult<Upid>>>,
    pub task_result: Arc<Mutex<PveResult<TaskStatus>>>,
}

impl MockPve {
    /// All operations succeed and tasks finish immediately
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            create_result: Arc::new(Mutex::new(Ok(Upid::new("UPID:pve1:create")))),
            start_result: Arc::new(Mutex::new(Ok(Upid::new("UPID:pve1:start")))),
            task_result: Arc::new(Mutex::new(Ok(TaskStatus {
                running: false,
                exit_status: Some("OK".to_string()),
            }))),
        }
    }

    pub fn get_calls(&self) -> Vec<PveCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count<F: Fn(&PveCall) -> bool>(&self, filter: F) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| filter(c)).count()
    }

    fn record(&self, call: PveCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Default for MockPve {
    fn default() -> Self {
        Self::new()
    }
}

fn clone_pve_error(e: &PveError) -> PveError {
    match e {
        PveError::ConnectionError(s) => PveError::ConnectionError(s.clone()),
        PveError::AuthFailed(s) => PveError::AuthFailed(s.clone()),
        PveError::Api { status, message } => PveError::Api {
            status: *status,
            message: message.clone(),
        },
        PveError::InvalidResponse(s) => PveError::InvalidResponse(s.clone()),
        PveError::TaskTimeout(s) => PveError::TaskTimeout(s.clone()),
        PveError::TaskFailed { upid, exit_status } => PveError::TaskFailed {
            upid: upid.clone(),
            exit_status: exit_status.clone(),
        },
        PveError::ExecError(s) => PveError::ExecError(s.clone()),
        PveError::ChannelClosed => PveError::ChannelClosed,
        PveError::Cancelled => PveError::Cancelled,
        PveError::Io(_) => PveError::ExecError("IO error (cloned)".to_string()),
    }
}

fn clone_result<T: Clone>(result: &Arc<Mutex<PveResult<T>>>) -> PveResult<T> {
    match &*result.lock().unwrap() {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(clone_pve_error(e)),
    }
}

#[async_trait]
impl PveClient for MockPve {
    async fn create_ct(&self, _node: &str, req: &CreateCtRequest) -> PveResult<Upid> {
        self.record(PveCall::CreateCt { vmid: req.vmid });
        clone_result(&self.create_result)
    }

    async fn start_ct(&self, _node: &str, vmid: u32) -> PveResult<Upid> {
        self.record(PveCall::StartCt { vmid });
        clone_result(&self.start_result)
    }

    async fn task_status(&self, _node: &str, upid: &Upid) -> PveResult<TaskStatus> {
        self.record(PveCall::TaskStatus {
            upid: upid.to_string(),
        });
        match &*self.task_result.lock().unwrap() {
            Ok(status) => Ok(TaskStatus {
                running: status.running,
                exit_status: status.exit_status.clone(),
            }),
            Err(e) => Err(clone_pve_error(e)),
        }
    }

    async fn ping(&self) -> PveResult<()> {
        self.record(PveCall::Ping);
        Ok(())
    }
}

struct ShellRule {
    prefix: String,
    exit_code: i64,
    output: String,
    lines: Vec<String>,
}

/// Scripted container shell: canned responses, recorded commands and writes
pub struct MockShell {
    commands: Arc<Mutex<Vec<String>>>,
    rules: Arc<Mutex<Vec<ShellRule>>>,
    files_written: Arc<Mutex<Vec<(String, Vec<u8>, String)>>>,
    dir_listings: Arc<Mutex<HashMap<String, Vec<String>>>>,
    file_contents: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    cancel_hooks: Arc<Mutex<Vec<(String, tokio_util::sync::CancellationToken)>>>,
    closed: Arc<AtomicBool>,
}

impl MockShell {
    /// A shell where every command succeeds with empty output
    pub fn new() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            rules: Arc::new(Mutex::new(Vec::new())),
            files_written: Arc::new(Mutex::new(Vec::new())),
            dir_listings: Arc::new(Mutex::new(HashMap::new())),
            file_contents: Arc::new(Mutex::new(HashMap::new())),
            cancel_hooks: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel `token` the moment a script matching `prefix` executes.
    /// Makes cancellation mid-pipeline deterministic in tests.
    pub fn cancel_on(self, prefix: &str, token: tokio_util::sync::CancellationToken) -> Self {
        self.cancel_hooks
            .lock()
            .unwrap()
            .push((prefix.to_string(), token));
        self
    }

    /// Respond to scripts starting with `prefix`
    pub fn on(self, prefix: &str, exit_code: i64, output: &str) -> Self {
        self.rules.lock().unwrap().push(ShellRule {
            prefix: prefix.to_string(),
            exit_code,
            output: output.to_string(),
            lines: output.lines().map(String::from).collect(),
        });
        self
    }

    /// Respond with explicit streamed lines
    pub fn on_lines(self, prefix: &str, exit_code: i64, lines: &[&str]) -> Self {
        self.rules.lock().unwrap().push(ShellRule {
            prefix: prefix.to_string(),
            exit_code,
            output: lines.join("\n"),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        });
        self
    }

    /// Seed a directory listing for `list_dir`
    pub fn with_dir(self, path: &str, entries: &[&str]) -> Self {
        self.dir_listings
            .lock()
            .unwrap()
            .insert(path.to_string(), entries.iter().map(|e| e.to_string()).collect());
        self
    }

    /// Seed file contents for `read_file`
    pub fn with_file(self, path: &str, contents: &[u8]) -> Self {
        self.file_contents
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_vec());
        self
    }

    /// All executed scripts, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Files pushed via `write_file`: (path, contents, mode)
    pub fn files_written(&self) -> Vec<(String, Vec<u8>, String)> {
        self.files_written.lock().unwrap().clone()
    }

    pub fn wrote_file(&self, path: &str) -> bool {
        self.files_written
            .lock()
            .unwrap()
            .iter()
            .any(|(p, _, _)| p == path)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn display(cmd: &ShellCommand) -> String {
        if cmd.program == "sh" && cmd.args.first().map(String::as_str) == Some("-c") {
            cmd.args.get(1).cloned().unwrap_or_default()
        } else {
            cmd.render()
        }
    }

    fn respond(&self, cmd: &ShellCommand) -> PveResult<(i64, String, Vec<String>)> {
        if self.is_closed() {
            return Err(PveError::ChannelClosed);
        }
        let display = Self::display(cmd);
        self.commands.lock().unwrap().push(display.clone());

        for (prefix, token) in self.cancel_hooks.lock().unwrap().iter() {
            if display.starts_with(prefix) {
                token.cancel();
            }
        }

        let rules = self.rules.lock().unwrap();
        for rule in rules.iter() {
            if display.starts_with(&rule.prefix) {
                return Ok((rule.exit_code, rule.output.clone(), rule.lines.clone()));
            }
        }
        Ok((0, String::new(), Vec::new()))
    }
}

impl Default for MockShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerShell for MockShell {
    async fn run(&self, cmd: &ShellCommand) -> PveResult<ExecOutput> {
        let (exit_code, output, _) = self.respond(cmd)?;
        Ok(ExecOutput { exit_code, output })
    }

    async fn run_streamed(&self, cmd: &ShellCommand, tx: mpsc::Sender<String>) -> PveResult<i64> {
        let (exit_code, _, lines) = self.respond(cmd)?;
        for line in lines {
            if tx.send(line).await.is_err() {
                return Err(PveError::Cancelled);
            }
        }
        Ok(exit_code)
    }

    async fn write_file(&self, path: &str, content: &[u8], mode: &str) -> PveResult<()> {
        if self.is_closed() {
            return Err(PveError::ChannelClosed);
        }
        self.files_written.lock().unwrap().push((
            path.to_string(),
            content.to_vec(),
            mode.to_string(),
        ));
        Ok(())
    }

    async fn read_file(&self, path: &str) -> PveResult<Vec<u8>> {
        if self.is_closed() {
            return Err(PveError::ChannelClosed);
        }
        self.file_contents
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| PveError::ExecError(format!("no such file {}", path)))
    }

    async fn list_dir(&self, path: &str) -> PveResult<Vec<String>> {
        if self.is_closed() {
            return Err(PveError::ChannelClosed);
        }
        Ok(self
            .dir_listings
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out one shared mock shell
pub struct MockShellFactory {
    shell: Arc<MockShell>,
}

impl MockShellFactory {
    pub fn new(shell: Arc<MockShell>) -> Self {
        Self { shell }
    }
}

impl ShellFactory for MockShellFactory {
    fn open(&self, _node_name: &str, _vmid: u32) -> Arc<dyn ContainerShell> {
        // Mirrors a real factory handing out a fresh, unclosed channel on
        // every open() call even though the mock reuses one instance.
        self.shell.closed.store(false, Ordering::SeqCst);
        self.shell.clone()
    }
}

/// A minimal valid job payload for tests
pub fn test_job(container_id: &str, template_id: Option<&str>) -> haus_config::ContainerCreationJob {
    serde_json::from_value(serde_json::json!({
        "containerId": container_id,
        "nodeName": "pve1",
        "templateId": template_id,
        "config": {
            "hostname": "test",
            "vmid": 120,
            "memoryMb": 1024,
            "swapMb": 512,
            "cores": 2,
            "diskGb": 8,
            "storage": "local-lvm",
            "bridge": "vmbr0",
            "ipConfig": "ip=dhcp",
            "nameserver": null,
            "rootPassword": "hunter2",
            "sshPublicKey": null,
            "unprivileged": true,
            "nesting": false,
            "ostemplate": "local:vztmpl/debian-12.tar.zst",
            "tags": []
        }
    }))
    .expect("valid test job")
}
