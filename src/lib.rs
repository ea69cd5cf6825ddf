//! Privloop - an iterative privilege-escalation assessment loop
//!
//! Privloop connects to one authorized target, runs an enumeration script,
//! turns its output into structured findings, asks a reasoning service for
//! ranked next steps and executes at most one of them per iteration, until
//! escalation is detected or the run runs out of options.

pub mod audit;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod id;
pub mod llm;
pub mod reasoner;
pub mod recon;
pub mod runner;
pub mod session;

pub use error::{PrivloopError, Result};
