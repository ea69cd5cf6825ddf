//! ID generation utilities for privloop
//!
//! Provides run identifiers and timestamps.

use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

static TAG_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique run ID
///
/// Format: `{timestamp_ms}-{hex8}` where the suffix is derived from the
/// target and process id, so two runs started in the same millisecond
/// against different hosts still get distinct IDs.
/// Example: `1738300800123-a1b2c3d4`
pub fn generate_run_id(target: &str) -> String {
    let timestamp = now_ms();
    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_be_bytes());
    hasher.update(std::process::id().to_be_bytes());
    hasher.update(target.as_bytes());
    let digest = hasher.finalize();
    format!("{}-{}", timestamp, hex::encode(&digest[..4]))
}

/// Generate a 12-hex-char one-off tag, distinct for every call in a process
pub fn generate_tag(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(now_ms().to_be_bytes());
    hasher.update(std::process::id().to_be_bytes());
    hasher.update(TAG_COUNTER.fetch_add(1, Ordering::Relaxed).to_be_bytes());
    hasher.update(seed.as_bytes());
    hex::encode(&hasher.finalize()[..6])
}
