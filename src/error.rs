//! Error types for privloop
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in privloop
#[derive(Debug, Error)]
pub enum PrivloopError {
    /// Remote authentication rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Host unreachable or transport failure while connecting
    #[error("Network error: {0}")]
    Network(String),

    /// Remote command or service call exceeded its deadline
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Session is not connected
    #[error("Session disconnected: {0}")]
    Disconnected(String),

    /// Recon or action command failed to run
    #[error("Execution error: {0}")]
    Execution(String),

    /// Reasoning service unreachable or returned an error status
    #[error("Reasoning service error: {0}")]
    ReasoningService(String),

    /// Reasoning service asked us to back off
    #[error("Reasoning service rate limited, retry after {}s", .0.as_secs())]
    RateLimited(std::time::Duration),

    /// Reasoning service refused the request; asking again will not help
    #[error("Reasoning service rejected request: {0}")]
    ReasoningRejected(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Audit trail could not be written or verified
    #[error("Audit error: {0}")]
    Audit(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML config parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PrivloopError {
    /// Taxonomy name recorded in the audit trail
    pub fn kind(&self) -> &'static str {
        match self {
            PrivloopError::Auth(_) | PrivloopError::Network(_) => "ConnectFailed",
            PrivloopError::Timeout(_) => "TimeoutError",
            PrivloopError::Disconnected(_) | PrivloopError::Execution(_) => "ExecutionError",
            PrivloopError::ReasoningService(_)
            | PrivloopError::RateLimited(_)
            | PrivloopError::ReasoningRejected(_) => "ReasoningServiceError",
            PrivloopError::Config(_) => "ConfigError",
            PrivloopError::Audit(_) => "AuditError",
            PrivloopError::Io(_) | PrivloopError::Json(_) | PrivloopError::Yaml(_) => "InternalError",
        }
    }

    /// Errors a stage may recover from by retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PrivloopError::Timeout(_)
                | PrivloopError::Network(_)
                | PrivloopError::Disconnected(_)
                | PrivloopError::Execution(_)
                | PrivloopError::ReasoningService(_)
                | PrivloopError::RateLimited(_)
        )
    }
}

/// Result type alias for privloop operations
pub type Result<T> = std::result::Result<T, PrivloopError>;
