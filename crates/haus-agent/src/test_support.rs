//! Test support for the agent
//!
//! Provides a scripted `CommandRunner` so handler and sync-engine tests run
//! without touching the real system.

use crate::{AgentError, Cmd, CommandOutput, CommandRunner, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// A rule matching commands by display-string prefix
struct Rule {
    prefix: String,
    exit_code: i64,
    stdout: String,
    times_out: bool,
    once: bool,
}

/// Configurable fake command runner: canned responses, recorded calls
pub struct ScriptedRunner {
    calls: Arc<Mutex<Vec<String>>>,
    rules: Arc<Mutex<Vec<Rule>>>,
    commands: HashSet<String>,
}

impl ScriptedRunner {
    /// A runner where every command succeeds with empty output
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            rules: Arc::new(Mutex::new(Vec::new())),
            commands: HashSet::new(),
        }
    }

    /// Mark an executable as present on PATH
    pub fn with_command(mut self, name: &str) -> Self {
        self.commands.insert(name.to_string());
        self
    }

    /// Respond to commands whose display string starts with `prefix`
    pub fn on(self, prefix: &str, exit_code: i64, stdout: &str) -> Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.to_string(),
            exit_code,
            stdout: stdout.to_string(),
            times_out: false,
            once: false,
        });
        self
    }

    /// Like `on`, but the rule is consumed by its first match
    pub fn on_once(self, prefix: &str, exit_code: i64, stdout: &str) -> Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.to_string(),
            exit_code,
            stdout: stdout.to_string(),
            times_out: false,
            once: true,
        });
        self
    }

    /// Simulate a timeout for commands matching `prefix`
    pub fn timeout_on(self, prefix: &str) -> Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.to_string(),
            exit_code: -1,
            stdout: String::new(),
            times_out: true,
            once: false,
        });
        self
    }

    /// All recorded command display strings, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls starting with `prefix`
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn respond(&self, cmd: &Cmd) -> Result<CommandOutput> {
        let display = cmd.display();
        self.calls.lock().unwrap().push(display.clone());

        let mut rules = self.rules.lock().unwrap();
        if let Some(idx) = rules.iter().position(|r| display.starts_with(&r.prefix)) {
            let (times_out, exit_code, stdout) = {
                let rule = &rules[idx];
                (rule.times_out, rule.exit_code, rule.stdout.clone())
            };
            if rules[idx].once {
                rules.remove(idx);
            }
            if times_out {
                return Err(AgentError::CommandTimeout {
                    command: display,
                    seconds: cmd.timeout.map(|t| t.as_secs()).unwrap_or(0),
                });
            }
            return Ok(CommandOutput {
                exit_code,
                stdout,
                stderr: String::new(),
            });
        }

        Ok(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, cmd: &Cmd) -> Result<CommandOutput> {
        self.respond(cmd)
    }

    async fn run_streamed(&self, cmd: &Cmd) -> Result<CommandOutput> {
        self.respond(cmd)
    }

    fn has_command(&self, name: &str) -> bool {
        self.commands.contains(name)
    }
}
