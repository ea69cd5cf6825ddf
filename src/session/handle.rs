//! Session handle - one authenticated remote connection per run.
//!
//! Wraps a [`Transport`] with connection state. `close` is idempotent and is
//! also invoked on drop, so a connection never outlives its handle.

use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::transport::{CommandOutput, SessionTarget, Transport, shell_quote};
use crate::error::{PrivloopError, Result};

/// Token echoed back after connecting
const ECHO_TOKEN: &str = "privloop_ready";

/// Timeout for short housekeeping commands
const ECHO_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Failed,
}

pub struct SessionHandle<T: Transport> {
    target: SessionTarget,
    transport: T,
    state: ConnectionState,
    /// Transport-level open succeeded and close is still owed
    transport_open: bool,
}

impl<T: Transport> SessionHandle<T> {
    pub fn new(target: SessionTarget, transport: T) -> Self {
        Self {
            target,
            transport,
            state: ConnectionState::Disconnected,
            transport_open: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Connect, authenticate and verify the session answers commands
    pub async fn open(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        info!("Connecting to {} ({} auth)", self.target.label(), self.target.credential.kind());

        if let Err(e) = self.transport.open(&self.target).await {
            self.state = ConnectionState::Failed;
            warn!("Connection to {} failed: {}", self.target.label(), e);
            return Err(e);
        }
        self.transport_open = true;
        self.state = ConnectionState::Connected;

        match self.echo_check().await {
            Ok(true) => {
                info!("Connected to {}", self.target.label());
                Ok(())
            }
            Ok(false) => {
                self.fail_and_release();
                Err(PrivloopError::Network("echo check returned no echo".to_string()))
            }
            Err(e) => {
                self.fail_and_release();
                Err(PrivloopError::Network(format!("echo check failed: {}", e)))
            }
        }
    }

    /// Echo round-trip check
    pub async fn echo_check(&mut self) -> Result<bool> {
        let out = self.run(&format!("echo {}", ECHO_TOKEN), ECHO_TIMEOUT).await?;
        Ok(out.success() && out.stdout.contains(ECHO_TOKEN))
    }

    /// Run a command on the target
    pub async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        if !self.is_connected() {
            return Err(PrivloopError::Disconnected(format!(
                "session to {} is {:?}",
                self.target.label(),
                self.state
            )));
        }
        debug!("Executing command: {}", command);
        let result = self.transport.run(command, timeout).await;
        match &result {
            Ok(out) => debug!("Command completed with exit code: {}", out.exit_code),
            Err(PrivloopError::Disconnected(msg)) => {
                warn!("Session lost while running command: {}", msg);
                self.fail_and_release();
            }
            Err(e) => debug!("Command failed: {}", e),
        }
        result
    }

    pub async fn upload(&mut self, local: &Path, remote_path: &str, timeout: Duration) -> Result<()> {
        if !self.is_connected() {
            return Err(PrivloopError::Disconnected(format!("cannot upload to {}", self.target.label())));
        }
        self.transport.upload(local, remote_path, timeout).await?;
        info!("Uploaded {} to {}", local.display(), remote_path);
        Ok(())
    }

    pub async fn file_exists(&mut self, remote_path: &str) -> Result<bool> {
        let out = self
            .run(&format!("test -f {}", shell_quote(remote_path)), ECHO_TIMEOUT)
            .await?;
        Ok(out.success())
    }

    /// Close the session. Safe to call any number of times.
    pub fn close(&mut self) {
        self.release();
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Disconnected;
            info!("Disconnected from {}", self.target.label());
        }
    }

    fn fail_and_release(&mut self) {
        self.release();
        self.state = ConnectionState::Failed;
    }

    fn release(&mut self) {
        if self.transport_open {
            self.transport_open = false;
            if let Err(e) = self.transport.close() {
                warn!("Error during disconnect: {}", e);
            }
        }
    }
}

impl<T: Transport> Drop for SessionHandle<T> {
    fn drop(&mut self) {
        self.close();
    }
}
