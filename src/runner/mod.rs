//! Run orchestration
//!
//! This module provides the orchestration loop:
//! - RunLoop drives connect, recon, analysis and action for one target
//! - Phase names the loop's states
//! - every path ends with the session closed and a RunReport

mod run_loop;

pub use run_loop::{Phase, RunLoop};
