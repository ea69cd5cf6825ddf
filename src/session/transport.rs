//! Transport seam for remote sessions
//!
//! The transport is the external capability that connects, authenticates,
//! runs commands and moves files. The session handle layers state tracking
//! and idempotent close on top of it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config::{Credential, TargetConfig};
use crate::error::Result;

/// Where and as whom to connect
#[derive(Debug, Clone)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub principal: String,
    pub credential: Credential,
    pub connect_timeout: Duration,
}

impl SessionTarget {
    pub fn from_config(target: &TargetConfig) -> Result<Self> {
        Ok(Self {
            host: target.host.clone(),
            port: target.port,
            principal: target.username.clone(),
            credential: target.credential()?,
            connect_timeout: Duration::from_secs(target.connect_timeout_secs),
        })
    }

    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.principal, self.host, self.port)
    }
}

/// Result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// The transport dropped output beyond its capture limit
    pub truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, the way a terminal would show them
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Remote command transport
#[async_trait]
pub trait Transport: Send {
    /// Connect and authenticate. Fails with `Auth` or `Network`.
    async fn open(&mut self, target: &SessionTarget) -> Result<()>;

    /// Run one command. Fails with `Timeout` or `Disconnected`; a non-zero
    /// remote exit code is not an error.
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    /// Copy a local file to `remote_path` on the target
    async fn upload(&mut self, local: &Path, remote_path: &str, timeout: Duration) -> Result<()>;

    /// Tear the connection down
    fn close(&mut self) -> Result<()>;
}

/// Quote a string for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
