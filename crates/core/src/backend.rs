//! Backend trait: the abstraction over LLM chat-completion endpoints.
//!
//! A Backend knows how to send a conversation to a model and get the
//! assistant text back. Each implementation owns its provider's request and
//! response shape and its authentication, and classifies its failures into
//! the shared [`BackendError`] taxonomy.
//!
//! Implementations: OpenAI-compatible, Anthropic Messages, Gemini.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::BackendError;
use crate::message::Message;

/// A single chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    /// The model to use (e.g., "gpt-4o", "claude-sonnet-4-20250514")
    pub model: String,

    /// The conversation messages, oldest first
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}

impl BackendRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// The assistant's reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    /// The assistant text
    pub content: String,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Backend trait.
///
/// The agent loop calls `send()` without knowing which provider is behind
/// it, so every adapter must honor the same contract: one request in, one
/// assistant text or one [`BackendError`] out, no side effects beyond the
/// network call.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name for this backend (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// The model used when neither the role nor the config names one.
    fn default_model(&self) -> &str;

    /// Send the conversation and wait for the complete reply.
    async fn send(&self, request: BackendRequest) -> std::result::Result<BackendResponse, BackendError>;
}
