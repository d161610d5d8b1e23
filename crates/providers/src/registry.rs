//! Backend registry: builds and looks up backends by configured name.
//!
//! Selection is static: the registry is built once from configuration and
//! handed to the dispatcher and planner.

use std::collections::HashMap;
use std::sync::Arc;
use taskloom_config::{AppConfig, BackendConfig};
use taskloom_core::backend::Backend;
use tracing::{debug, warn};
use crate::anthropic::AnthropicBackend;
use crate::gemini::GeminiBackend;
use crate::openai_compat::OpenAiCompatBackend;

/// Which wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    OpenAi,
    Anthropic,
    Gemini,
}

impl BackendKind {
    /// Explicit `kind` wins; otherwise infer from the backend name.
    pub fn resolve(name: &str, kind: Option<&str>) -> Self {
        match kind.unwrap_or(name) {
            "anthropic" => BackendKind::Anthropic,
            "gemini" | "google" => BackendKind::Gemini,
            _ => BackendKind::OpenAi,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::OpenAi => "openai",
            BackendKind::Anthropic => "anthropic",
            BackendKind::Gemini => "gemini",
        }
    }
}

/// A registered backend and how it was built.
#[derive(Clone)]
pub struct RegisteredBackend {
    pub backend: Arc<dyn Backend>,
    pub kind: BackendKind,
    pub has_credential: bool,
}

/// Looks up backends by configured name.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, RegisteredBackend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own name. Replaces any existing entry.
    pub fn register(&mut self, backend: Arc<dyn Backend>, kind: BackendKind, has_credential: bool) {
        self.backends.insert(
            backend.name().to_string(),
            RegisteredBackend { backend, kind, has_credential },
        );
    }

    /// Get a backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(name).map(|r| r.backend.clone())
    }

    pub fn entry(&self, name: &str) -> Option<&RegisteredBackend> {
        self.backends.get(name)
    }

    /// List all registered backend names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Build backends from configuration.
    ///
    /// Every `[backends.*]` entry is registered, plus any well-known backend
    /// that the config references without configuring. Names that are
    /// neither stay unregistered, so dispatching to them fails with
    /// `UnknownBackend`.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        let empty = BackendConfig::default();

        for name in config.referenced_backends() {
            let backend_config = config.backends.get(&name).unwrap_or(&empty);
            match build_backend(&name, backend_config) {
                Some(registered) => {
                    debug!(backend = %name, kind = registered.kind.as_str(), "Registered backend");
                    registry.backends.insert(name, registered);
                }
                None => warn!(backend = %name, "No endpoint known for backend; add api_url to its config"),
            }
        }

        registry
    }
}

fn build_backend(name: &str, config: &BackendConfig) -> Option<RegisteredBackend> {
    let kind = BackendKind::resolve(name, config.kind.as_deref());
    let api_key = config.api_key.clone();

    let backend: Arc<dyn Backend> = match kind {
        BackendKind::Anthropic => {
            let mut b = AnthropicBackend::new(api_key.clone()).with_name(name);
            if let Some(url) = &config.api_url {
                b = b.with_base_url(url);
            }
            if let Some(model) = &config.model {
                b = b.with_default_model(model);
            }
            Arc::new(b)
        }
        BackendKind::Gemini => {
            let mut b = GeminiBackend::new(api_key.clone()).with_name(name);
            if let Some(url) = &config.api_url {
                b = b.with_base_url(url);
            }
            if let Some(model) = &config.model {
                b = b.with_default_model(model);
            }
            Arc::new(b)
        }
        BackendKind::OpenAi => {
            let base_url = config
                .api_url
                .clone()
                .or_else(|| default_base_url(name).map(String::from))?;
            let mut b = OpenAiCompatBackend::new(name, base_url, api_key.clone());
            if is_local(name) {
                b = b.without_key();
            }
            if let Some(model) = config.model.clone().or_else(|| default_model(name).map(String::from)) {
                b = b.with_default_model(model);
            }
            Arc::new(b)
        }
    };

    Some(RegisteredBackend {
        backend,
        kind,
        has_credential: api_key.as_deref().is_some_and(|k| !k.is_empty()) || is_local(name),
    })
}

/// Local servers that need no credential.
fn is_local(name: &str) -> bool {
    matches!(name, "ollama" | "vllm" | "llamacpp")
}

/// Get the default base URL for well-known OpenAI-compatible backends.
pub fn default_base_url(name: &str) -> Option<&'static str> {
    match name {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        "llamacpp" => Some("http://localhost:8080/v1"),
        _ => None,
    }
}

fn default_model(name: &str) -> Option<&'static str> {
    match name {
        "openrouter" => Some("openai/gpt-4o-mini"),
        "deepseek" => Some("deepseek-chat"),
        "groq" => Some("llama-3.3-70b-versatile"),
        "together" => Some("meta-llama/Llama-3.3-70B-Instruct-Turbo"),
        "ollama" => Some("llama3.1"),
        _ => None,
    }
}
