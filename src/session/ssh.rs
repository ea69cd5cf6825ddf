//! SSH transport on libssh2
//!
//! One authenticated session is held from `open` to `close`. Every command
//! opens a channel on that session and uploads go over its SFTP subsystem.
//! libssh2 calls block, so each one runs on tokio's blocking pool; dropping
//! the future of an in-flight command raises a flag the worker polls, which
//! is how timeouts and operator interrupts reach it.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info};
use ssh2::{ErrorCode, HashType, OpenFlags, OpenType, Session};

use super::transport::{CommandOutput, SessionTarget, Transport};
use crate::config::{Credential, validate_host, validate_username};
use crate::error::{PrivloopError, Result};

/// Hard cap on bytes kept per stream
const CAPTURE_LIMIT: usize = 16 * 1024 * 1024;

/// How long one channel read may block before the worker checks for cancellation
const POLL_INTERVAL_MS: u32 = 200;

/// Slack on top of a blocking call's own deadline before the async side gives up on it
const WORKER_GRACE: Duration = Duration::from_secs(5);

/// libssh2's LIBSSH2_ERROR_TIMEOUT
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

struct Connection {
    session: Session,
    /// Second handle on the socket so close can shut it down
    stream: TcpStream,
}

#[derive(Default)]
pub struct SshTransport {
    conn: Option<Connection>,
}

impl SshTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> Result<Session> {
        self.conn
            .as_ref()
            .map(|c| c.session.clone())
            .ok_or_else(|| PrivloopError::Disconnected("ssh transport not opened".to_string()))
    }
}

/// Sets its flag when dropped, telling a blocking worker to stop
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn millis(d: Duration) -> u32 {
    d.as_millis().clamp(1, u32::MAX as u128) as u32
}

/// Bytes from one stream, capped at `limit`
struct Capture {
    kept: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            kept: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.kept.len());
        if room < chunk.len() {
            self.truncated = true;
        }
        self.kept.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_text(self) -> (String, bool) {
        (String::from_utf8_lossy(&self.kept).into_owned(), self.truncated)
    }
}

fn session_error(e: ssh2::Error, timeout: Duration) -> PrivloopError {
    match e.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => PrivloopError::Timeout(timeout.as_secs()),
        ErrorCode::Session(_) => PrivloopError::Disconnected(e.to_string()),
        ErrorCode::SFTP(_) => PrivloopError::Execution(e.to_string()),
    }
}

fn io_error(e: std::io::Error, timeout: Duration) -> PrivloopError {
    match e.kind() {
        ErrorKind::TimedOut => PrivloopError::Timeout(timeout.as_secs()),
        _ => PrivloopError::Disconnected(e.to_string()),
    }
}

/// Resolve, connect, handshake and authenticate
fn connect(target: &SessionTarget) -> Result<Connection> {
    let label = target.label();
    let addr = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| PrivloopError::Network(format!("cannot resolve {}: {}", target.host, e)))?
        .next()
        .ok_or_else(|| PrivloopError::Network(format!("no address for {}", target.host)))?;

    let stream = TcpStream::connect_timeout(&addr, target.connect_timeout)
        .map_err(|e| PrivloopError::Network(format!("connect to {} failed: {}", addr, e)))?;
    let handle = stream.try_clone().map_err(|e| PrivloopError::Network(e.to_string()))?;

    let mut session = Session::new().map_err(|e| PrivloopError::Network(e.to_string()))?;
    session.set_tcp_stream(stream);
    session.set_timeout(millis(target.connect_timeout));
    session
        .handshake()
        .map_err(|e| PrivloopError::Network(format!("ssh handshake with {} failed: {}", addr, e)))?;
    if let Some(hash) = session.host_key_hash(HashType::Sha256) {
        info!("{} host key sha256:{}", label, hex::encode(hash));
    }

    let authed = match &target.credential {
        Credential::Password(password) => session.userauth_password(&target.principal, password),
        Credential::KeyFile(path) => session.userauth_pubkey_file(&target.principal, None, path, None),
    };
    authed.map_err(|e| {
        PrivloopError::Auth(format!(
            "{} authentication as {} failed: {}",
            target.credential.kind(),
            target.principal,
            e
        ))
    })?;
    if !session.authenticated() {
        return Err(PrivloopError::Auth(format!("{} was not authenticated", label)));
    }

    Ok(Connection { session, stream: handle })
}

/// Read what is available; false once the stream reached end of file
fn pump<R: Read>(reader: &mut R, capture: &mut Capture, buf: &mut [u8], timeout: Duration) -> Result<bool> {
    match reader.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            capture.push(&buf[..n]);
            Ok(true)
        }
        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(true),
        Err(e) => Err(io_error(e, timeout)),
    }
}

fn exec_blocking(session: &Session, command: &str, timeout: Duration, cancelled: &AtomicBool) -> Result<CommandOutput> {
    let started = Instant::now();
    let deadline = started + timeout;

    session.set_timeout(millis(timeout));
    let mut channel = session.channel_session().map_err(|e| session_error(e, timeout))?;
    channel.exec(command).map_err(|e| session_error(e, timeout))?;
    channel.send_eof().map_err(|e| session_error(e, timeout))?;

    session.set_timeout(POLL_INTERVAL_MS);
    let mut stdout = Capture::new(CAPTURE_LIMIT);
    let mut stderr = Capture::new(CAPTURE_LIMIT);
    let mut buf = [0u8; 8192];
    let mut out_open = true;
    let mut err_open = true;
    while out_open || err_open {
        if cancelled.load(Ordering::Relaxed) {
            let _ = channel.close();
            return Err(PrivloopError::Execution(format!("'{}' cancelled", command)));
        }
        if Instant::now() >= deadline {
            let _ = channel.close();
            return Err(PrivloopError::Timeout(timeout.as_secs()));
        }
        if out_open {
            out_open = pump(&mut channel, &mut stdout, &mut buf, timeout)?;
        }
        if err_open {
            err_open = pump(&mut channel.stderr(), &mut stderr, &mut buf, timeout)?;
        }
    }

    session.set_timeout(millis(deadline.saturating_duration_since(Instant::now()) + WORKER_GRACE));
    channel.wait_close().map_err(|e| session_error(e, timeout))?;
    let exit_code = channel.exit_status().map_err(|e| session_error(e, timeout))?;

    let (stdout, out_truncated) = stdout.into_text();
    let (stderr, err_truncated) = stderr.into_text();
    Ok(CommandOutput {
        command: command.to_string(),
        exit_code,
        stdout,
        stderr,
        duration_ms: started.elapsed().as_millis() as u64,
        truncated: out_truncated || err_truncated,
    })
}

fn upload_blocking(session: &Session, data: &[u8], remote_path: &str, timeout: Duration) -> Result<()> {
    session.set_timeout(millis(timeout));
    let sftp = session.sftp().map_err(|e| session_error(e, timeout))?;
    let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;
    let mut file = sftp
        .open_mode(Path::new(remote_path), flags, 0o700, OpenType::File)
        .map_err(|e| PrivloopError::Execution(format!("cannot write {}: {}", remote_path, e)))?;
    file.write_all(data).map_err(|e| io_error(e, timeout))?;
    Ok(())
}

/// Wait on a blocking worker, allowing it a little past its own deadline
async fn join_worker<T: Send + 'static>(
    task: tokio::task::JoinHandle<Result<T>>,
    budget: Duration,
    on_elapsed: PrivloopError,
) -> Result<T> {
    match tokio::time::timeout(budget + WORKER_GRACE, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(PrivloopError::Execution(format!("ssh worker failed: {}", join))),
        Err(_) => Err(on_elapsed),
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&mut self, target: &SessionTarget) -> Result<()> {
        validate_host(&target.host)?;
        validate_username(&target.principal)?;
        self.close()?;

        let owned = target.clone();
        let task = tokio::task::spawn_blocking(move || connect(&owned));
        let elapsed = PrivloopError::Network(format!(
            "connect to {} timed out after {}s",
            target.label(),
            target.connect_timeout.as_secs()
        ));
        let conn = join_worker(task, target.connect_timeout, elapsed).await?;
        debug!("ssh session to {} authenticated", target.label());
        self.conn = Some(conn);
        Ok(())
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let session = self.session()?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancelled.clone());
        let owned = command.to_string();
        let task = tokio::task::spawn_blocking(move || exec_blocking(&session, &owned, timeout, &cancelled));
        join_worker(task, timeout, PrivloopError::Timeout(timeout.as_secs())).await
    }

    async fn upload(&mut self, local: &Path, remote_path: &str, timeout: Duration) -> Result<()> {
        let session = self.session()?;
        let data = tokio::fs::read(local).await?;
        let remote = remote_path.to_string();
        let task = tokio::task::spawn_blocking(move || upload_blocking(&session, &data, &remote, timeout));
        join_worker(task, timeout, PrivloopError::Timeout(timeout.as_secs())).await
    }

    fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.session.set_timeout(2_000);
            if let Err(e) = conn.session.disconnect(None, "privloop session closed", None) {
                debug!("ssh disconnect: {}", e);
            }
            let _ = conn.stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }
}
