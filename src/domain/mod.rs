//! Domain types for privloop
//!
//! This module contains all core domain types:
//! - Finding / FindingSet: structured recon results
//! - Action / ActionOutcome: proposed steps and what happened when they ran
//! - RunState: iteration count, append-only history and termination reason
//! - RunReport: the summary emitted when a run ends

pub mod action;
pub mod finding;
pub mod run;

pub use action::{Action, ActionKind, ActionOutcome, Classification, RiskTier};
pub use finding::{Category, Confidence, Finding, FindingSet};
pub use run::{IterationRecord, RunReport, RunState, TargetProfile, TerminationReason};
