//! Action and ActionOutcome types
//!
//! An Action is one remote step proposed by the reasoner. Each Action is
//! consumed at most once; its ActionOutcome is appended to run history and
//! never changed afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the action does on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Command,
    FileEdit,
    PrivilegeCheck,
}

/// Risk tier declared by the reasoner (and possibly raised by the executor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Safe,
    Unknown,
    Destructive,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Safe => f.write_str("safe"),
            RiskTier::Unknown => f.write_str("unknown"),
            RiskTier::Destructive => f.write_str("destructive"),
        }
    }
}

/// One proposed remote step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Literal command text run on the target
    pub command: String,
    /// Index into the FindingSet this action targets
    pub finding: Option<usize>,
    pub risk: RiskTier,
    pub justification: String,
}

impl Action {
    pub fn command(command: impl Into<String>, risk: RiskTier) -> Self {
        Self {
            kind: ActionKind::Command,
            command: command.into(),
            finding: None,
            risk,
            justification: String::new(),
        }
    }

    pub fn with_kind(mut self, kind: ActionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn targeting(mut self, finding: usize) -> Self {
        self.finding = Some(finding);
        self
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = justification.into();
        self
    }
}

/// Classification of an executed (or refused) action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Success,
    PartialSuccess,
    Failure,
    Refused,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::Success => "Success",
            Classification::PartialSuccess => "PartialSuccess",
            Classification::Failure => "Failure",
            Classification::Refused => "Refused",
        };
        f.write_str(s)
    }
}

/// Recorded result of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: Action,
    /// Remote exit code; None when the command never ran or timed out
    pub exit_code: Option<i32>,
    /// Captured stdout followed by stderr, possibly truncated
    pub output: String,
    pub classification: Classification,
    /// Output carried a configured escalation marker
    pub escalation_detected: bool,
    pub duration_ms: u64,
}

impl ActionOutcome {
    /// Outcome for an action rejected by policy
    pub fn refused(action: Action, reason: impl Into<String>) -> Self {
        Self {
            action,
            exit_code: None,
            output: reason.into(),
            classification: Classification::Refused,
            escalation_detected: false,
            duration_ms: 0,
        }
    }

    /// Privilege escalation achieved by this action
    pub fn is_achieved(&self) -> bool {
        self.classification == Classification::Success && self.escalation_detected
    }

    pub fn was_executed(&self) -> bool {
        self.classification != Classification::Refused
    }
}
