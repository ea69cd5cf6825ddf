//! Run state, history and termination
//!
//! RunState is owned by the orchestration loop. History is append-only: a
//! past iteration record is never edited or removed, and the termination
//! reason is set exactly once.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::action::{ActionOutcome, Classification};
use super::finding::FindingSet;

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    Achieved,
    ConnectFailed,
    ReconUnavailable,
    NoFurtherProgress,
    MaxIterationsReached,
    Interrupted,
    InternalFault(String),
}

impl TerminationReason {
    /// Only an internal fault is an unclean exit
    pub fn is_fault(&self) -> bool {
        matches!(self, TerminationReason::InternalFault(_))
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Achieved => f.write_str("Achieved"),
            TerminationReason::ConnectFailed => f.write_str("ConnectFailed"),
            TerminationReason::ReconUnavailable => f.write_str("ReconUnavailable"),
            TerminationReason::NoFurtherProgress => f.write_str("NoFurtherProgress"),
            TerminationReason::MaxIterationsReached => f.write_str("MaxIterationsReached"),
            TerminationReason::Interrupted => f.write_str("Interrupted"),
            TerminationReason::InternalFault(msg) => write!(f, "InternalFault({})", msg),
        }
    }
}

/// Basic facts about the target gathered once after connecting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProfile {
    pub hostname: String,
    pub kernel: String,
    pub os: String,
    pub architecture: String,
    pub whoami: String,
    pub id: String,
    pub cwd: String,
}

/// Everything that happened in one iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number
    pub iteration: u32,
    pub findings: FindingSet,
    pub outcomes: Vec<ActionOutcome>,
    /// Commands proposed again and skipped as duplicates
    pub duplicates: Vec<String>,
}

/// Mutable state of a single run
#[derive(Debug, Clone)]
pub struct RunState {
    run_id: String,
    max_iterations: u32,
    iteration: u32,
    history: Vec<IterationRecord>,
    reason: Option<TerminationReason>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            run_id: run_id.into(),
            max_iterations,
            iteration: 0,
            history: Vec::new(),
            reason: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    pub fn reason(&self) -> Option<&TerminationReason> {
        self.reason.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.reason.is_some()
    }

    /// Room for another iteration under the configured maximum
    pub fn has_budget(&self) -> bool {
        self.iteration < self.max_iterations
    }

    /// Open a new iteration with a fresh FindingSet.
    ///
    /// Returns the new iteration number, or None when the budget is spent or
    /// the run is already terminated.
    pub fn begin_iteration(&mut self, findings: FindingSet) -> Option<u32> {
        if self.is_terminated() || !self.has_budget() {
            return None;
        }
        self.iteration += 1;
        self.history.push(IterationRecord {
            iteration: self.iteration,
            findings,
            outcomes: Vec::new(),
            duplicates: Vec::new(),
        });
        Some(self.iteration)
    }

    /// Append an outcome to the current iteration
    pub fn record_outcome(&mut self, outcome: ActionOutcome) {
        if let Some(current) = self.history.last_mut() {
            current.outcomes.push(outcome);
        }
    }

    /// Note a command skipped as a duplicate in the current iteration
    pub fn record_duplicate(&mut self, command: impl Into<String>) {
        if let Some(current) = self.history.last_mut() {
            current.duplicates.push(command.into());
        }
    }

    /// Any recorded outcome with this literal command text
    pub fn has_command(&self, command: &str) -> bool {
        self.outcomes().any(|o| o.action.command == command)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.history.iter().flat_map(|r| r.outcomes.iter())
    }

    /// Set the termination reason. Only the first call has an effect.
    pub fn finalize(&mut self, reason: TerminationReason) -> bool {
        if self.reason.is_some() {
            return false;
        }
        self.reason = Some(reason);
        true
    }
}

/// Final summary emitted when a run terminates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub target: String,
    pub reason: TerminationReason,
    pub iterations: u32,
    pub executed: usize,
    pub refused: usize,
    pub duplicates: usize,
    /// Command that achieved escalation, if any
    pub achieved_by: Option<String>,
    pub profile: Option<TargetProfile>,
    pub audit_path: Option<PathBuf>,
}

impl RunReport {
    pub fn from_state(
        state: &RunState,
        target: impl Into<String>,
        profile: Option<TargetProfile>,
        audit_path: Option<PathBuf>,
    ) -> Self {
        let executed = state.outcomes().filter(|o| o.was_executed()).count();
        let refused = state
            .outcomes()
            .filter(|o| o.classification == Classification::Refused)
            .count();
        let duplicates = state.history().iter().map(|r| r.duplicates.len()).sum();
        let achieved_by = state
            .outcomes()
            .find(|o| o.is_achieved())
            .map(|o| o.action.command.clone());

        Self {
            run_id: state.run_id().to_string(),
            target: target.into(),
            reason: state
                .reason()
                .cloned()
                .unwrap_or_else(|| TerminationReason::InternalFault("run not finalized".to_string())),
            iterations: state.iteration(),
            executed,
            refused,
            duplicates,
            achieved_by,
            profile,
            audit_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, RiskTier};

    fn outcome(command: &str, classification: Classification) -> ActionOutcome {
        ActionOutcome {
            action: Action::command(command, RiskTier::Safe),
            exit_code: Some(0),
            output: String::new(),
            classification,
            escalation_detected: false,
            duration_ms: 1,
        }
    }

    #[test]
    fn test_begin_iteration_respects_budget() {
        let mut state = RunState::new("run-1", 2);
        assert_eq!(state.begin_iteration(FindingSet::default()), Some(1));
        assert_eq!(state.begin_iteration(FindingSet::default()), Some(2));
        assert_eq!(state.begin_iteration(FindingSet::default()), None);
        assert_eq!(state.iteration(), 2);
        assert_eq!(state.history().len(), 2);
    }

    #[test]
    fn test_finalize_only_once() {
        let mut state = RunState::new("run-1", 3);
        assert!(state.finalize(TerminationReason::NoFurtherProgress));
        assert!(!state.finalize(TerminationReason::Achieved));
        assert_eq!(state.reason(), Some(&TerminationReason::NoFurtherProgress));
        assert_eq!(state.begin_iteration(FindingSet::default()), None);
    }

    #[test]
    fn test_record_outcome_appends_to_current() {
        let mut state = RunState::new("run-1", 3);
        state.begin_iteration(FindingSet::default());
        state.record_outcome(outcome("id", Classification::Success));
        state.begin_iteration(FindingSet::default());
        state.record_outcome(outcome("sudo -l", Classification::Failure));
        state.record_duplicate("id");

        assert_eq!(state.history()[0].outcomes.len(), 1);
        assert_eq!(state.history()[1].outcomes.len(), 1);
        assert_eq!(state.history()[1].duplicates, vec!["id".to_string()]);
        assert!(state.has_command("id"));
        assert!(state.has_command("sudo -l"));
        assert!(!state.has_command("whoami"));
    }

    #[test]
    fn test_outcome_before_iteration_is_ignored() {
        let mut state = RunState::new("run-1", 3);
        state.record_outcome(outcome("id", Classification::Success));
        assert_eq!(state.outcomes().count(), 0);
    }

    #[test]
    fn test_report_counts() {
        let mut state = RunState::new("run-1", 3);
        state.begin_iteration(FindingSet::default());
        state.record_outcome(outcome("rm -rf /opt", Classification::Refused));
        let mut winning = outcome("sudo /usr/bin/find . -exec id \\;", Classification::Success);
        winning.escalation_detected = true;
        state.record_outcome(winning);
        state.finalize(TerminationReason::Achieved);

        let report = RunReport::from_state(&state, "alice@10.0.0.5:22", None, None);
        assert_eq!(report.executed, 1);
        assert_eq!(report.refused, 1);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.reason, TerminationReason::Achieved);
        assert_eq!(report.achieved_by.as_deref(), Some("sudo /usr/bin/find . -exec id \\;"));
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(TerminationReason::MaxIterationsReached.to_string(), "MaxIterationsReached");
        assert_eq!(
            TerminationReason::InternalFault("disk full".into()).to_string(),
            "InternalFault(disk full)"
        );
        assert!(TerminationReason::InternalFault("x".into()).is_fault());
        assert!(!TerminationReason::ConnectFailed.is_fault());
    }
}
