//! Reconnaissance: stage and run the enumeration script, profile the
//! target, and turn raw output into findings.

mod collector;
pub mod parser;
mod profile;

pub use collector::{RawReconOutput, ReconCollector};
pub use parser::{ParseStats, parse, parse_with_stats};
pub use profile::{UNKNOWN, collect_profile};
