//! Reasoning-service client layer
//!
//! This module provides:
//! - Message types for completion requests
//! - LlmClient trait for API abstraction
//! - AnthropicClient and OpenAiClient implementations
//! - MockLlmClient for scripted runs

pub mod anthropic;
pub mod client;
pub mod openai;
pub mod types;

pub use anthropic::AnthropicClient;
pub use client::{ClientSettings, LlmClient, LlmError, MockLlmClient};
pub use openai::OpenAiClient;
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, Usage};
