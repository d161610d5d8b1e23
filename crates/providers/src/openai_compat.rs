//! OpenAI-compatible backend implementation.
//!
//! Works with: OpenAI, OpenRouter, DeepSeek, Groq, Together AI, Ollama,
//! vLLM, and any endpoint exposing `/chat/completions`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskloom_core::backend::{Backend, BackendRequest, BackendResponse, Usage};
use taskloom_core::error::BackendError;
use taskloom_core::message::{Message, Role};
use tracing::{debug, warn};
use crate::classify::{http_client, malformed_body, status_error, transport_error};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// An OpenAI-compatible chat-completion backend.
pub struct OpenAiCompatBackend {
    name: String,
    base_url: String,
    api_key: Option<String>,
    requires_key: bool,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Create a new OpenAI-compatible backend.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            requires_key: true,
            default_model: DEFAULT_MODEL.into(),
            client: http_client(120),
        }
    }

    /// Create an OpenAI backend (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", Some(api_key.into()))
    }

    /// Create an Ollama backend (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new("ollama", base_url.unwrap_or("http://localhost:11434/v1"), None)
            .without_key()
            .with_default_model("llama3.1")
    }

    /// Local servers accept unauthenticated requests.
    pub fn without_key(mut self) -> Self {
        self.requires_key = false;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                },
                content: m.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
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
        if self.requires_key && self.api_key.is_none() {
            return Err(BackendError::Auth(format!("no API key configured for '{}'", self.name)));
        }

        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(backend = %self.name, model = %request.model, messages = request.messages.len(), "Sending completion request");

        let mut http = self.client.post(&url).header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            http = http.header("Authorization", format!("Bearer {key}"));
        }

        let response = http
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(backend = %self.name, status, body = %error_body, "Backend returned error");
            return Err(status_error(&self.name, status, &error_body));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| malformed_body(&self.name, e))?;

        api_response.into_backend_response(&self.name)
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl ApiResponse {
    fn into_backend_response(self, backend: &str) -> Result<BackendResponse, BackendError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| malformed_body(backend, "no choices in response"))?;

        Ok(BackendResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: self.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            model: self.model,
        })
    }
}
