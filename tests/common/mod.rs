//! Shared fixtures for run-loop integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use privloop::audit::{AuditEvent, AuditLog};
use privloop::config::Config;
use privloop::domain::ActionOutcome;
use privloop::error::{PrivloopError, Result};
use privloop::session::{CommandOutput, SessionTarget, Transport};
use tempfile::TempDir;

pub const RECON_COMMAND: &str = "sh '/tmp/linpeas.sh' '-a'";

pub const RECON_OUTPUT: &str = "\
╔══════════╣ Operative system
Linux version 5.4.0-42-generic
╔══════════╣ Cron jobs
\x1b[1;31;103m-rwxrwxrwx 1 root root 120 Jan  1 00:00 /etc/cron.d/backup\x1b[0m
╔══════════╣ Checking 'sudo -l'
\x1b[1;31m(root) NOPASSWD: /usr/bin/find\x1b[0m
";

/// Stands for the identity-check tag in a scripted reply
pub const TAG: &str = "{tag}";

/// Identity-check prefix as the executor writes it
const TAG_PREFIX: &str = "privloop-";

type Handler = Box<dyn FnMut(&str) -> Result<CommandOutput> + Send>;

/// In-memory transport answering commands from a handler.
///
/// Actions arrive wrapped in the executor's identity check; the handler sees
/// the bare action, and any `{tag}` in its stdout is replaced with the
/// check's tag, the way a shell reading the check would print it.
pub struct ScriptedTransport {
    handler: Handler,
    open_error: Option<PrivloopError>,
    stall_on: Option<String>,
    answer_echo: bool,
    pub commands: Arc<Mutex<Vec<String>>>,
    pub closes: Arc<AtomicU32>,
}

impl ScriptedTransport {
    pub fn new(handler: impl FnMut(&str) -> Result<CommandOutput> + Send + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            open_error: None,
            stall_on: None,
            answer_echo: true,
            commands: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail `open` with this error
    pub fn failing_open(mut self, error: PrivloopError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Never return from the command with this text
    pub fn stalling_on(mut self, command: &str) -> Self {
        self.stall_on = Some(command.to_string());
        self
    }

    /// Leave the connect echo unanswered
    pub fn without_echo(mut self) -> Self {
        self.answer_echo = false;
        self
    }

    pub fn close_count(&self) -> Arc<AtomicU32> {
        self.closes.clone()
    }

    pub fn command_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.commands.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&mut self, _target: &SessionTarget) -> Result<()> {
        match self.open_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run(&mut self, command: &str, _timeout: Duration) -> Result<CommandOutput> {
        if command == "echo privloop_ready" {
            return Ok(reply(0, if self.answer_echo { "privloop_ready\n" } else { "" }));
        }
        self.commands.lock().unwrap().push(command.to_string());
        let action = action_of(command);
        if self.stall_on.as_deref() == Some(action) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let mut out = (self.handler)(action)?;
        if let Some(tag) = tag_of(command) {
            out.stdout = out.stdout.replace(TAG, &format!("{}{}", TAG_PREFIX, tag));
        }
        out.command = command.to_string();
        Ok(out)
    }

    async fn upload(&mut self, _local: &Path, _remote_path: &str, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The action inside an identity-check wrapper, or `sent` unchanged
pub fn action_of(sent: &str) -> &str {
    sent.split_once(" | {\n")
        .and_then(|(_, body)| body.strip_suffix("\n}"))
        .unwrap_or(sent)
}

fn tag_of(sent: &str) -> Option<&str> {
    let (script, _) = sent.split_once(" | {\n")?;
    let rest = &script[script.find(TAG_PREFIX)? + TAG_PREFIX.len()..];
    rest.split_whitespace().next()
}

/// What a shell left reading stdin prints when it runs as `uid`
pub fn shell_as(uid: u32) -> CommandOutput {
    reply(0, &format!("{}:{}\n", TAG, uid))
}

pub fn reply(exit_code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: stdout.to_string(),
        ..Default::default()
    }
}

/// Replies to profile lookups, the staging check and recon
pub fn host_reply(command: &str) -> Option<CommandOutput> {
    Some(match command {
        "hostname" => reply(0, "web01\n"),
        "uname -r" => reply(0, "5.4.0-42-generic\n"),
        "uname -m" => reply(0, "x86_64\n"),
        "whoami" => reply(0, "alice\n"),
        "id" => reply(0, "uid=1000(alice) gid=1000(alice) groups=1000(alice)\n"),
        "pwd" => reply(0, "/home/alice\n"),
        c if c.starts_with("sed -n") => reply(0, "Ubuntu 20.04.6 LTS\n"),
        c if c.starts_with("test -f") => reply(0, ""),
        RECON_COMMAND => reply(0, RECON_OUTPUT),
        _ => return None,
    })
}

/// Answers profile lookups, the staging check and recon; `action` answers
/// everything else
pub fn target_host(mut action: impl FnMut(&str) -> CommandOutput + Send + 'static) -> ScriptedTransport {
    ScriptedTransport::new(move |command| Ok(host_reply(command).unwrap_or_else(|| action(command))))
}

/// Any action fails with a permission error
pub fn denied(_command: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 1,
        stderr: "Permission denied".to_string(),
        ..Default::default()
    }
}

/// Valid config for 10.0.0.5 with its audit trail under `dir`
pub fn test_config(dir: &Path, max_iterations: u32) -> Config {
    let mut config = Config::default();
    config.target.host = "10.0.0.5".to_string();
    config.target.username = "alice".to_string();
    config.target.key_file = Some(PathBuf::from("/home/op/.ssh/id_ed25519"));
    config.policy.max_iterations = max_iterations;
    config.audit.dir = dir.to_path_buf();
    config.log_dir = Some(dir.to_path_buf());
    config
}

pub fn temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

/// JSON plan with safe commands and no finding references
pub fn plan(commands: &[&str]) -> String {
    let actions: Vec<serde_json::Value> = commands
        .iter()
        .map(|c| {
            serde_json::json!({
                "kind": "command",
                "command": c,
                "finding": null,
                "risk": "safe",
                "justification": "next step"
            })
        })
        .collect();
    serde_json::json!({ "actions": actions }).to_string()
}

pub fn audit_events(path: &Path) -> Vec<AuditEvent> {
    AuditLog::read_records(path)
        .unwrap()
        .into_iter()
        .map(|r| r.event)
        .collect()
}

pub fn action_outcomes(path: &Path) -> Vec<ActionOutcome> {
    audit_events(path)
        .into_iter()
        .filter_map(|e| match e {
            AuditEvent::ActionOutcome { outcome, .. } => Some(outcome),
            _ => None,
        })
        .collect()
}
