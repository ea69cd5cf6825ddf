//! Scripted transport for unit tests

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::handle::SessionHandle;
use super::transport::{CommandOutput, SessionTarget, Transport};
use crate::config::Credential;
use crate::error::{PrivloopError, Result};

type Handler = Box<dyn FnMut(&str) -> Result<CommandOutput> + Send>;

pub(crate) struct ScriptedTransport {
    handler: Handler,
    open_error: Option<PrivloopError>,
    answer_echo: bool,
    pub commands: Arc<Mutex<Vec<String>>>,
    pub uploads: Arc<Mutex<Vec<String>>>,
    pub closes: Arc<AtomicU32>,
}

impl ScriptedTransport {
    pub fn new(handler: impl FnMut(&str) -> Result<CommandOutput> + Send + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            open_error: None,
            answer_echo: true,
            commands: Arc::new(Mutex::new(Vec::new())),
            uploads: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// `open` fails once with `err`
    pub fn failing_open(mut self, err: PrivloopError) -> Self {
        self.open_error = Some(err);
        self
    }

    /// Pass the connect echo to the handler instead of answering it
    pub fn without_echo(mut self) -> Self {
        self.answer_echo = false;
        self
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
        if self.answer_echo && command == "echo privloop_ready" {
            return Ok(reply(0, "privloop_ready\n"));
        }
        self.commands.lock().unwrap().push(command.to_string());
        let mut out = (self.handler)(command)?;
        out.command = command.to_string();
        Ok(out)
    }

    async fn upload(&mut self, _local: &Path, remote_path: &str, _timeout: Duration) -> Result<()> {
        self.uploads.lock().unwrap().push(remote_path.to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn reply(exit_code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: stdout.to_string(),
        ..Default::default()
    }
}

pub(crate) fn target() -> SessionTarget {
    SessionTarget {
        host: "10.0.0.5".to_string(),
        port: 22,
        principal: "alice".to_string(),
        credential: Credential::Password("pw".to_string()),
        connect_timeout: Duration::from_secs(5),
    }
}

/// Opened session plus the log of commands it received
pub(crate) async fn connected(
    handler: impl FnMut(&str) -> Result<CommandOutput> + Send + 'static,
) -> (SessionHandle<ScriptedTransport>, Arc<Mutex<Vec<String>>>) {
    let transport = ScriptedTransport::new(handler);
    let commands = transport.commands.clone();
    let mut session = SessionHandle::new(target(), transport);
    session.open().await.unwrap();
    (session, commands)
}
