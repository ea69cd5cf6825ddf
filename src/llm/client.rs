//! Core reasoning-service client trait and errors

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::types::{CompletionRequest, CompletionResponse};
use crate::config::LlmConfig;
use crate::error::PrivloopError;

/// Stateless client - each call is independent (fresh context)
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single completion request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Settings common to every provider client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl ClientSettings {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.effective_model(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Errors that can occur during reasoning-service calls
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::Network(_) => true,
            LlmError::InvalidResponse(_) => false,
            LlmError::JsonError(_) => false,
            LlmError::MissingApiKey { .. } => false,
        }
    }
}

impl From<LlmError> for PrivloopError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::MissingApiKey { .. } => PrivloopError::Config(e.to_string()),
            LlmError::RateLimited { retry_after } => PrivloopError::RateLimited(retry_after),
            _ if e.is_retryable() => PrivloopError::ReasoningService(e.to_string()),
            _ => PrivloopError::ReasoningRejected(e.to_string()),
        }
    }
}

/// Scripted client returning queued responses in order.
///
/// Once the queue is drained every call returns an empty response. Requests
/// are kept for inspection.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response
    pub fn respond(self, content: impl Into<String>) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(content.into()));
        }
        self
    }

    /// Queue a failure
    pub fn fail(self, error: LlmError) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(error));
        }
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let next = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(Ok(content)) => Ok(CompletionResponse::text(content)),
            Some(Err(e)) => Err(e),
            None => Ok(CompletionResponse::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_is_retryable() {
        assert!(
            LlmError::RateLimited {
                retry_after: Duration::from_secs(60)
            }
            .is_retryable()
        );
        assert!(
            LlmError::ApiError {
                status: 502,
                message: "bad gateway".to_string()
            }
            .is_retryable()
        );
        assert!(
            !LlmError::ApiError {
                status: 400,
                message: "bad request".to_string()
            }
            .is_retryable()
        );
        assert!(!LlmError::InvalidResponse("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_error_conversion() {
        let e: PrivloopError = LlmError::ApiError {
            status: 500,
            message: "boom".to_string(),
        }
        .into();
        assert_eq!(e.kind(), "ReasoningServiceError");

        let e: PrivloopError = LlmError::MissingApiKey {
            env_var: "OPENAI_API_KEY".to_string(),
        }
        .into();
        assert_eq!(e.kind(), "ConfigError");

        let e: PrivloopError = LlmError::ApiError {
            status: 401,
            message: "invalid x-api-key".to_string(),
        }
        .into();
        assert!(matches!(e, PrivloopError::ReasoningRejected(_)));

        let e: PrivloopError = LlmError::RateLimited {
            retry_after: Duration::from_secs(30),
        }
        .into();
        assert!(matches!(e, PrivloopError::RateLimited(d) if d == Duration::from_secs(30)));
    }

    #[test]
    fn test_settings_from_config() {
        let settings = ClientSettings::from_config(&LlmConfig::default());
        assert_eq!(settings.model, "gpt-4");
        assert_eq!(settings.max_tokens, 4096);
        assert_eq!(settings.timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_mock_client_replays_in_order() {
        let mock = MockLlmClient::new()
            .respond("first")
            .fail(LlmError::InvalidResponse("nope".to_string()));

        let first = mock.complete(CompletionRequest::new("sys")).await.unwrap();
        assert_eq!(first.content, "first");
        assert!(mock.complete(CompletionRequest::new("sys")).await.is_err());
        let drained = mock.complete(CompletionRequest::new("sys")).await.unwrap();
        assert!(drained.content.is_empty());
        assert_eq!(mock.call_count(), 3);
    }
}
