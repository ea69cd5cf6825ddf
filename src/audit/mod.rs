//! Per-run audit trail
//!
//! Append-only JSONL file, one record per line, written and flushed
//! incrementally so a crash preserves everything recorded so far. Each record
//! carries the SHA-256 of its predecessor, so an edited or reordered trail
//! fails [`AuditLog::verify`].

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{ActionOutcome, TargetProfile, TerminationReason};
use crate::error::{PrivloopError, Result};
use crate::session::{CommandOutput, SessionHandle, Transport};

/// prev_hash of the first record
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Stage a remote command or error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Connect,
    Profile,
    Upload,
    Recon,
    Reasoning,
    Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    RunStarted {
        run_id: String,
        target: String,
        credential_kind: String,
        max_iterations: u32,
        allow_destructive: bool,
        force_repeat: bool,
    },
    Connected {
        target: String,
    },
    ConnectFailed {
        error_kind: String,
        message: String,
    },
    Profile {
        profile: TargetProfile,
    },
    /// Written before the command is sent to the target
    Command {
        stage: Stage,
        command: String,
    },
    CommandResult {
        stage: Stage,
        command: String,
        exit_code: Option<i32>,
        output_bytes: usize,
        duration_ms: u64,
        error: Option<String>,
    },
    ReconCollected {
        iteration: u32,
        bytes: usize,
        truncated: bool,
    },
    FindingsParsed {
        iteration: u32,
        findings: usize,
        confirmed: usize,
        dropped_lines: usize,
        degraded: bool,
    },
    ReasoningResponse {
        iteration: u32,
        attempt: u32,
        response: String,
        actions: usize,
    },
    PlanRejected {
        iteration: u32,
        attempt: u32,
        reason: String,
    },
    ActionOutcome {
        iteration: u32,
        outcome: ActionOutcome,
    },
    DuplicateSkipped {
        iteration: u32,
        command: String,
    },
    StageError {
        stage: Stage,
        error_kind: String,
        message: String,
    },
    Terminated {
        reason: TerminationReason,
        iterations: u32,
    },
}

impl AuditEvent {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::RunStarted { .. } => "run_started",
            AuditEvent::Connected { .. } => "connected",
            AuditEvent::ConnectFailed { .. } => "connect_failed",
            AuditEvent::Profile { .. } => "profile",
            AuditEvent::Command { .. } => "command",
            AuditEvent::CommandResult { .. } => "command_result",
            AuditEvent::ReconCollected { .. } => "recon_collected",
            AuditEvent::FindingsParsed { .. } => "findings_parsed",
            AuditEvent::ReasoningResponse { .. } => "reasoning_response",
            AuditEvent::PlanRejected { .. } => "plan_rejected",
            AuditEvent::ActionOutcome { .. } => "action_outcome",
            AuditEvent::DuplicateSkipped { .. } => "duplicate_skipped",
            AuditEvent::StageError { .. } => "stage_error",
            AuditEvent::Terminated { .. } => "terminated",
        }
    }
}

/// Fields covered by a record's hash
#[derive(Serialize)]
struct Unsigned<'a> {
    seq: u64,
    ts: &'a str,
    prev_hash: &'a str,
    event: &'a AuditEvent,
}

/// One line of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: u64,
    pub ts: String,
    pub prev_hash: String,
    pub event: AuditEvent,
    pub hash: String,
}

impl AuditRecord {
    fn compute_hash(seq: u64, ts: &str, prev_hash: &str, event: &AuditEvent) -> Result<String> {
        let unsigned = Unsigned {
            seq,
            ts,
            prev_hash,
            event,
        };
        let bytes = serde_json::to_vec(&unsigned)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// Append-only audit log for one run
pub struct AuditLog {
    path: PathBuf,
    file: File,
    seq: u64,
    last_hash: String,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Create `run-<run_id>.jsonl` under `dir`
    pub fn create(dir: impl AsRef<Path>, run_id: &str) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(format!("run-{}.jsonl", run_id));
        Self::open(path)
    }

    /// Open an audit file for appending, continuing an existing chain
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (seq, last_hash) = if path.exists() {
            match Self::read_records(&path)?.last() {
                Some(last) => (last.seq + 1, last.hash.clone()),
                None => (0, GENESIS_HASH.to_string()),
            }
        } else {
            (0, GENESIS_HASH.to_string())
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            seq,
            last_hash,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written so far
    pub fn len(&self) -> u64 {
        self.seq
    }

    pub fn is_empty(&self) -> bool {
        self.seq == 0
    }

    /// Append one event and flush it to disk
    pub fn record(&mut self, event: AuditEvent) -> Result<()> {
        let ts = Utc::now().to_rfc3339();
        let hash = AuditRecord::compute_hash(self.seq, &ts, &self.last_hash, &event)?;
        let record = AuditRecord {
            seq: self.seq,
            ts,
            prev_hash: self.last_hash.clone(),
            event,
            hash,
        };
        let line = serde_json::to_string(&record)?;
        writeln!(self.file, "{}", line).map_err(|e| PrivloopError::Audit(format!("write failed: {}", e)))?;
        self.file
            .flush()
            .map_err(|e| PrivloopError::Audit(format!("flush failed: {}", e)))?;
        log::debug!("audit #{} {}", record.seq, record.event.name());
        self.seq += 1;
        self.last_hash = record.hash;
        Ok(())
    }

    /// Parse every record in an audit file
    pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<AuditRecord>> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                records.push(serde_json::from_str(&line)?);
            }
        }
        Ok(records)
    }

    /// Check sequence numbers and the hash chain. Returns the record count.
    pub fn verify(path: impl AsRef<Path>) -> Result<usize> {
        let records = Self::read_records(path)?;
        let mut expected_prev = GENESIS_HASH.to_string();
        for (index, record) in records.iter().enumerate() {
            if record.seq != index as u64 {
                return Err(PrivloopError::Audit(format!(
                    "record {} has sequence number {}",
                    index, record.seq
                )));
            }
            if record.prev_hash != expected_prev {
                return Err(PrivloopError::Audit(format!("record {} breaks the hash chain", index)));
            }
            let actual = AuditRecord::compute_hash(record.seq, &record.ts, &record.prev_hash, &record.event)?;
            if actual != record.hash {
                return Err(PrivloopError::Audit(format!("record {} content does not match its hash", index)));
            }
            expected_prev = record.hash.clone();
        }
        Ok(records.len())
    }
}

/// Run a remote command with its audit records around it.
///
/// The `Command` record is flushed before the command is sent. An
/// `AuditError` from this function always means the trail could not be
/// written; any other error is the command's own.
pub async fn run_audited<T: Transport>(
    audit: &mut AuditLog,
    session: &mut SessionHandle<T>,
    stage: Stage,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput> {
    audit.record(AuditEvent::Command {
        stage,
        command: command.to_string(),
    })?;
    let result = session.run(command, timeout).await;
    let event = match &result {
        Ok(out) => AuditEvent::CommandResult {
            stage,
            command: command.to_string(),
            exit_code: Some(out.exit_code),
            output_bytes: out.stdout.len() + out.stderr.len(),
            duration_ms: out.duration_ms,
            error: None,
        },
        Err(e) => AuditEvent::CommandResult {
            stage,
            command: command.to_string(),
            exit_code: None,
            output_bytes: 0,
            duration_ms: 0,
            error: Some(e.to_string()),
        },
    };
    audit.record(event)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, RiskTier};
    use tempfile::TempDir;

    fn command(cmd: &str) -> AuditEvent {
        AuditEvent::Command {
            stage: Stage::Action,
            command: cmd.to_string(),
        }
    }

    #[test]
    fn test_create_and_record() {
        let dir = TempDir::new().unwrap();
        let mut log = AuditLog::create(dir.path(), "run-1").unwrap();
        assert!(log.is_empty());

        log.record(command("id")).unwrap();
        log.record(AuditEvent::Terminated {
            reason: TerminationReason::NoFurtherProgress,
            iterations: 1,
        })
        .unwrap();

        assert_eq!(log.len(), 2);
        assert!(log.path().ends_with("run-run-1.jsonl"));

        let records = AuditLog::read_records(log.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].prev_hash, GENESIS_HASH);
        assert_eq!(records[1].prev_hash, records[0].hash);
        assert_eq!(records[0].event, command("id"));
    }

    #[test]
    fn test_verify_intact_chain() {
        let dir = TempDir::new().unwrap();
        let mut log = AuditLog::create(dir.path(), "r").unwrap();
        log.record(command("id")).unwrap();
        log.record(AuditEvent::ActionOutcome {
            iteration: 1,
            outcome: crate::domain::ActionOutcome::refused(Action::command("reboot", RiskTier::Destructive), "no"),
        })
        .unwrap();
        log.record(command("sudo -l")).unwrap();

        assert_eq!(AuditLog::verify(log.path()).unwrap(), 3);
    }

    #[test]
    fn test_verify_detects_edit() {
        let dir = TempDir::new().unwrap();
        let mut log = AuditLog::create(dir.path(), "r").unwrap();
        log.record(command("id")).unwrap();
        log.record(command("sudo -l")).unwrap();
        let path = log.path().to_path_buf();
        drop(log);

        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("sudo -l", "whoami")).unwrap();

        let err = AuditLog::verify(&path).unwrap_err();
        assert!(err.to_string().contains("record 1"));
    }

    #[test]
    fn test_verify_detects_removed_record() {
        let dir = TempDir::new().unwrap();
        let mut log = AuditLog::create(dir.path(), "r").unwrap();
        log.record(command("a")).unwrap();
        log.record(command("b")).unwrap();
        log.record(command("c")).unwrap();
        let path = log.path().to_path_buf();
        drop(log);

        let content = fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        fs::write(&path, kept.join("\n")).unwrap();

        assert!(AuditLog::verify(&path).is_err());
    }

    #[test]
    fn test_reopen_continues_chain() {
        let dir = TempDir::new().unwrap();
        let path = {
            let mut log = AuditLog::create(dir.path(), "r").unwrap();
            log.record(command("a")).unwrap();
            log.path().to_path_buf()
        };

        let mut log = AuditLog::open(&path).unwrap();
        assert_eq!(log.len(), 1);
        log.record(command("b")).unwrap();

        assert_eq!(AuditLog::verify(&path).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_run_audited_records_before_and_after() {
        let dir = TempDir::new().unwrap();
        let mut log = AuditLog::create(dir.path(), "r").unwrap();
        let (mut session, _) = crate::session::fake::connected(|_| Ok(crate::session::fake::reply(0, "uid=1000"))).await;

        let out = run_audited(&mut log, &mut session, Stage::Profile, "id", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "uid=1000");

        let records = AuditLog::read_records(log.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, AuditEvent::Command { stage: Stage::Profile, command: "id".to_string() });
        match &records[1].event {
            AuditEvent::CommandResult { exit_code, output_bytes, error, .. } => {
                assert_eq!(*exit_code, Some(0));
                assert_eq!(*output_bytes, 8);
                assert!(error.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_audited_records_failure() {
        let dir = TempDir::new().unwrap();
        let mut log = AuditLog::create(dir.path(), "r").unwrap();
        let (mut session, _) = crate::session::fake::connected(|_| Err(PrivloopError::Timeout(3))).await;

        let err = run_audited(&mut log, &mut session, Stage::Action, "sleep 99", Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, PrivloopError::Timeout(3)));

        let records = AuditLog::read_records(log.path()).unwrap();
        match &records[1].event {
            AuditEvent::CommandResult { exit_code, error, .. } => {
                assert_eq!(*exit_code, None);
                assert!(error.as_deref().unwrap().contains("Timed out"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_serialization_tag() {
        let json = serde_json::to_value(command("id")).unwrap();
        assert_eq!(json["type"], "command");
        assert_eq!(json["stage"], "action");
    }
}
