//! Google Gemini backend implementation.
//!
//! Uses the `generateContent` REST endpoint. The key travels in the
//! `x-goog-api-key` header and the assistant role is called `model`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskloom_core::backend::{Backend, BackendRequest, BackendResponse, Usage};
use taskloom_core::error::BackendError;
use taskloom_core::message::{Message, Role};
use tracing::{debug, warn};
use crate::classify::{http_client, malformed_body, status_error, transport_error};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiBackend {
    name: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            name: "gemini".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            default_model: DEFAULT_MODEL.into(),
            client: http_client(120),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn to_contents(messages: &[Message]) -> Vec<GeminiContent> {
        messages
            .iter()
            .map(|m| GeminiContent {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "model".into(),
                },
                parts: vec![GeminiPart { text: m.content.clone() }],
            })
            .collect()
    }

    fn into_backend_response(resp: GeminiResponse, requested_model: String) -> Result<BackendResponse, BackendError> {
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| malformed_body("gemini", "no candidates in response"))?;

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(BackendResponse {
            content,
            usage: resp.usage_metadata.map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
            model: resp.model_version.unwrap_or(requested_model),
        })
    }
}

#[async_trait]
impl Backend for GeminiBackend {
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

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, request.model);

        let body = GeminiRequest {
            contents: Self::to_contents(&request.messages),
            generation_config: GenerationConfig {
                temperature: Some(request.temperature),
                max_output_tokens: request.max_tokens,
            },
        };

        debug!(backend = %self.name, model = %request.model, "Sending generateContent request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key.as_str())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(backend = %self.name, status, body = %error_body, "Gemini API error");
            return Err(status_error(&self.name, status, &error_body));
        }

        let api_resp: GeminiResponse = response
            .json()
            .await
            .map_err(|e| malformed_body(&self.name, e))?;

        Self::into_backend_response(api_resp, request.model)
    }
}

// --- Gemini API types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}
