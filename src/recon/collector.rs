//! Recon collection
//!
//! Stages the enumeration script on the target once per run, then runs it
//! and captures its output under a byte ceiling.

use std::time::{Duration, Instant};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditLog, Stage, run_audited};
use crate::config::ReconConfig;
use crate::error::{PrivloopError, Result};
use crate::session::{SessionHandle, Transport, shell_quote};

/// Captured recon text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReconOutput {
    pub text: String,
    /// Size of `text` in bytes
    pub bytes: usize,
    /// Output was cut at the capture ceiling
    pub truncated: bool,
}

impl RawReconOutput {
    pub fn new(text: String, truncated: bool) -> Self {
        Self {
            bytes: text.len(),
            text,
            truncated,
        }
    }
}

/// Cut `text` to at most `max` bytes on a char boundary
fn truncate_at(text: &mut String, max: usize) -> bool {
    if text.len() <= max {
        return false;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    true
}

pub struct ReconCollector {
    config: ReconConfig,
    staged: bool,
}

impl ReconCollector {
    pub fn new(config: ReconConfig) -> Self {
        Self { config, staged: false }
    }

    /// Shell command that runs the staged script
    pub fn command(&self) -> String {
        let mut parts = vec![self.config.interpreter.clone(), shell_quote(&self.config.remote_path)];
        parts.extend(self.config.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }

    pub fn is_staged(&self) -> bool {
        self.staged
    }

    /// Make sure the script is on the target. Uploads at most once per run.
    pub async fn stage<T: Transport>(&mut self, session: &mut SessionHandle<T>, audit: &mut AuditLog) -> Result<()> {
        if self.staged {
            return Ok(());
        }
        let timeout = Duration::from_secs(self.config.timeout_secs);

        match self.config.local_script.clone() {
            Some(local) => {
                let description = format!("upload {} -> {}", local.display(), self.config.remote_path);
                audit.record(AuditEvent::Command {
                    stage: Stage::Upload,
                    command: description.clone(),
                })?;
                let started = Instant::now();
                let result = session.upload(&local, &self.config.remote_path, timeout).await;
                audit.record(AuditEvent::CommandResult {
                    stage: Stage::Upload,
                    command: description,
                    exit_code: result.as_ref().ok().map(|_| 0),
                    output_bytes: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: result.as_ref().err().map(|e| e.to_string()),
                })?;
                result?;
            }
            None => {
                let check = format!("test -f {}", shell_quote(&self.config.remote_path));
                let out = run_audited(audit, session, Stage::Upload, &check, timeout).await?;
                if !out.success() {
                    return Err(PrivloopError::Execution(format!(
                        "recon script {} is not present on the target and no local script is configured",
                        self.config.remote_path
                    )));
                }
                info!("Using recon script already present at {}", self.config.remote_path);
            }
        }
        self.staged = true;
        Ok(())
    }

    /// Run the recon script and capture its output
    pub async fn collect<T: Transport>(
        &mut self,
        session: &mut SessionHandle<T>,
        audit: &mut AuditLog,
    ) -> Result<RawReconOutput> {
        self.stage(session, audit).await?;

        let command = self.command();
        let timeout = Duration::from_secs(self.config.timeout_secs);
        info!("Running recon: {}", command);
        let out = run_audited(audit, session, Stage::Recon, &command, timeout).await?;

        if !out.success() && out.stdout.trim().is_empty() {
            return Err(PrivloopError::Execution(format!(
                "recon exited {} without output: {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }

        // linpeas writes some of its checks to stderr
        let mut text = out.combined();
        let cut = truncate_at(&mut text, self.config.max_output_bytes);
        let truncated = cut || out.truncated;
        if truncated {
            warn!(
                "TruncatedOutput: recon output exceeded {} bytes, findings may be incomplete",
                self.config.max_output_bytes
            );
        }
        info!("Recon collected {} bytes in {}ms", text.len(), out.duration_ms);
        Ok(RawReconOutput::new(text, truncated))
    }
}
