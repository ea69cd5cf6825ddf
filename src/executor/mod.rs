//! Action executor
//!
//! Runs one admitted action on the session with a bounded timeout and turns
//! the result into an ActionOutcome. Failures to run become Failure outcomes;
//! only an audit-trail failure is returned as an error.

mod identity;
mod policy;

use std::time::{Duration, Instant};

use log::{info, warn};

use crate::audit::{AuditLog, Stage, run_audited};
use crate::config::PolicyConfig;
use crate::domain::{Action, ActionOutcome, Classification};
use crate::error::{PrivloopError, Result};
use crate::session::{SessionHandle, Transport};

pub use identity::IdentityCheck;
pub use policy::{ActionPolicy, Admission};

/// Keep the tail of long output, where results usually are
fn clip_output(output: &str, max: usize) -> String {
    let total = output.chars().count();
    if total <= max {
        return output.to_string();
    }
    let tail: String = output.chars().skip(total - max).collect();
    format!("[{} chars truncated]\n{}", total - max, tail)
}

pub struct ActionExecutor {
    policy: ActionPolicy,
    timeout: Duration,
    max_captured_output: usize,
}

impl ActionExecutor {
    pub fn new(config: &PolicyConfig) -> Result<Self> {
        Ok(Self {
            policy: ActionPolicy::new(config)?,
            timeout: Duration::from_secs(config.action_timeout_secs),
            max_captured_output: config.max_captured_output,
        })
    }

    /// Admissibility check; see [`ActionPolicy::admit`]
    pub fn admit(&self, action: Action, seen: impl Fn(&str) -> bool) -> Admission {
        self.policy.admit(action, seen)
    }

    /// Run an admitted action and classify the result
    pub async fn execute<T: Transport>(
        &self,
        session: &mut SessionHandle<T>,
        audit: &mut AuditLog,
        action: Action,
    ) -> Result<ActionOutcome> {
        info!("Executing [{}] {}", action.risk, action.command);
        let started = Instant::now();

        let check = IdentityCheck::new(&action.command);
        let sent = check.wrap(&action.command);
        let outcome = match run_audited(audit, session, Stage::Action, &sent, self.timeout).await {
            Ok(out) => {
                let combined = out.combined();
                let escalation_detected = self.policy.detects_escalation(&check.reported_uids(&combined));
                let output = check.scrub(&combined);
                let classification = self.policy.classify(out.exit_code, &output);
                ActionOutcome {
                    action,
                    exit_code: Some(out.exit_code),
                    output: clip_output(&output, self.max_captured_output),
                    classification,
                    escalation_detected,
                    duration_ms: out.duration_ms.max(started.elapsed().as_millis() as u64),
                }
            }
            Err(e @ PrivloopError::Audit(_)) => return Err(e),
            Err(e) => {
                warn!("Action '{}' did not complete: {}", action.command, e);
                ActionOutcome {
                    action,
                    exit_code: None,
                    output: format!("{}: {}", e.kind(), e),
                    classification: Classification::Failure,
                    escalation_detected: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        };

        info!(
            "Outcome: {}{}",
            outcome.classification,
            if outcome.is_achieved() { " (escalation detected)" } else { "" }
        );
        Ok(outcome)
    }
}
