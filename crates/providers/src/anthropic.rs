//! Anthropic native backend implementation.
//!
//! Uses Anthropic's Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - `max_tokens` is mandatory
//! - consecutive messages with the same role are merged, since the API
//!   requires strict user/assistant alternation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskloom_core::backend::{Backend, BackendRequest, BackendResponse, Usage};
use taskloom_core::error::BackendError;
use taskloom_core::message::{Message, Role};
use tracing::{debug, warn};
use crate::classify::{http_client, malformed_body, status_error, transport_error};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Anthropic native Messages API backend.
pub struct AnthropicBackend {
    name: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
    /// Create a new Anthropic backend.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            default_model: DEFAULT_MODEL.into(),
            client: http_client(300),
        }
    }

    /// Register under a different name (e.g. a second Anthropic account).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Convert messages to Anthropic API format, merging same-role runs.
    fn to_api_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            match result.last_mut() {
                Some(prev) if prev.role == role => {
                    prev.content.push_str("\n\n");
                    prev.content.push_str(&msg.content);
                }
                _ => result.push(AnthropicMessage {
                    role: role.into(),
                    content: msg.content.clone(),
                }),
            }
        }

        result
    }

    fn into_backend_response(resp: AnthropicResponse) -> BackendResponse {
        let content = resp
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        BackendResponse {
            content,
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            }),
            model: resp.model,
        }
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn send(
        &self,
        request: BackendRequest,
    ) -> std::result::Result<BackendResponse, BackendError> {
        let Some(api_key) = &self.api_key else {
            return Err(BackendError::Auth(format!("no API key configured for '{}'", self.name)));
        };

        let url = format!("{}/v1/messages", self.base_url);

        let body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        debug!(backend = %self.name, model = %request.model, "Sending messages request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(backend = %self.name, status, body = %error_body, "Anthropic API error");
            return Err(status_error(&self.name, status, &error_body));
        }

        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| malformed_body(&self.name, e))?;

        Ok(Self::into_backend_response(api_resp))
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
