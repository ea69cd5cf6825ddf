//! OpenAI Responses API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::client::{ClientSettings, LlmClient, LlmError};
use super::types::{CompletionRequest, CompletionResponse, StopReason, Usage};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/responses";

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    settings: ClientSettings,
}

impl OpenAiClient {
    /// Create a client reading the API key from `api_key_env`
    pub fn from_env(api_key_env: &str, settings: ClientSettings) -> Result<Self, LlmError> {
        let api_key = std::env::var(api_key_env).map_err(|_| LlmError::MissingApiKey {
            env_var: api_key_env.to_string(),
        })?;
        Self::with_api_key(api_key, settings)
    }

    pub fn with_api_key(api_key: String, settings: ClientSettings) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            api_key,
            settings,
        })
    }

    fn build_request(&self, request: &CompletionRequest) -> Value {
        let mut input = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            input.push(json!({ "role": "system", "content": request.system }));
        }
        input.extend(
            request
                .messages
                .iter()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content })),
        );

        json!({
            "model": self.settings.model,
            "input": input,
            "temperature": request.temperature.unwrap_or(self.settings.temperature),
            "max_output_tokens": request.max_tokens.unwrap_or(self.settings.max_tokens),
        })
    }

    fn parse_response(&self, body: Value) -> Result<CompletionResponse, LlmError> {
        let output = body["output"]
            .as_array()
            .ok_or_else(|| LlmError::InvalidResponse("missing output array".to_string()))?;

        // Concatenate every output_text part of every message item
        let content = output
            .iter()
            .filter(|item| item["type"].as_str() == Some("message"))
            .filter_map(|item| item["content"].as_array())
            .flatten()
            .filter(|part| part["type"].as_str() == Some("output_text"))
            .filter_map(|part| part["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        let stop_reason = match body["status"].as_str() {
            Some("incomplete") => match body["incomplete_details"]["reason"].as_str() {
                Some("max_output_tokens") => StopReason::MaxTokens,
                _ => StopReason::Other,
            },
            _ => StopReason::EndTurn,
        };

        let usage = body
            .get("usage")
            .map(|u| {
                Usage::new(
                    u["input_tokens"].as_u64().unwrap_or(0),
                    u["output_tokens"].as_u64().unwrap_or(0),
                )
            })
            .unwrap_or_default();


        Ok(CompletionResponse {
            content,
            stop_reason,
            usage,
        })
    }

    async fn send_request(&self, body: Value) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(&request);
        let response = self.send_request(body).await?;
        self.parse_response(response)
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("model", &self.settings.model)
            .finish()
    }
}
