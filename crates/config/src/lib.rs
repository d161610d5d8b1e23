//! Configuration loading, validation, and management for Taskloom.
//!
//! Loads configuration from `~/.taskloom/config.toml` with environment
//! variable overrides. Validates all settings at startup. The resulting
//! [`AppConfig`] is passed explicitly to every constructor that needs it;
//! nothing in the engine reads the environment on its own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.taskloom/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend used by roles that don't name one
    #[serde(default = "default_backend")]
    pub default_backend: String,

    /// Model used when neither the role nor the backend names one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Sampling temperature for every request
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per backend response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Backend-specific configurations
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,

    /// Retry policy for backend calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Agent loop limits and action settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Planner settings
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Role definitions
    #[serde(default = "default_roles")]
    pub roles: HashMap<String, RoleConfig>,
}

fn default_backend() -> String {
    "openai".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("default_backend", &self.default_backend)
            .field("default_model", &self.default_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("backends", &self.backends)
            .field("retry", &self.retry)
            .field("agent", &self.agent)
            .field("planner", &self.planner)
            .field("roles", &self.roles)
            .finish()
    }
}

/// One `[backends.<name>]` entry.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Wire protocol: "openai", "anthropic" or "gemini". Inferred from the
    /// backend name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per backend call, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles for each one after
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Request/respond/act cycles per agent loop run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Cap on each action result fed back to the backend
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// How deep `delegate` actions may nest
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: u32,

    /// Directory actions run in. Defaults to the process working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_max_result_chars() -> usize {
    8000
}
fn default_command_timeout_secs() -> u64 {
    300
}
fn default_max_delegation_depth() -> u32 {
    2
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_result_chars: default_max_result_chars(),
            command_timeout_secs: default_command_timeout_secs(),
            max_delegation_depth: default_max_delegation_depth(),
            workdir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Backend for decomposition and summarization. Falls back to
    /// `default_backend`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Keep iterating while the summary reports `incomplete`
    #[serde(default)]
    pub auto_continue: bool,

    #[serde(default = "default_max_outer_iterations")]
    pub max_outer_iterations: u32,

    /// Pause between outer iterations
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_max_outer_iterations() -> u32 {
    10
}
fn default_cooldown_secs() -> u64 {
    5
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            backend: None,
            model: None,
            auto_continue: false,
            max_outer_iterations: default_max_outer_iterations(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// One `[roles.<name>]` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Prompt text prepended to every task for this role
    #[serde(default)]
    pub persona: String,
}

impl RoleConfig {
    fn with_persona(persona: &str) -> Self {
        Self {
            persona: persona.into(),
            ..Self::default()
        }
    }
}

fn default_roles() -> HashMap<String, RoleConfig> {
    HashMap::from([
        (
            "backend".to_string(),
            RoleConfig::with_persona("You are a backend engineer. You build services, APIs and business logic."),
        ),
        (
            "frontend".to_string(),
            RoleConfig::with_persona("You are a frontend engineer. You build user interfaces and client-side code."),
        ),
        (
            "db".to_string(),
            RoleConfig::with_persona("You are a database engineer. You design schemas, migrations and queries."),
        ),
        (
            "reviewer".to_string(),
            RoleConfig::with_persona("You are a code reviewer. You inspect changes, run the tests and report problems."),
        ),
    ])
}

impl AppConfig {
    /// Load configuration from the default path (~/.taskloom/config.toml).
    ///
    /// Environment overrides, highest priority:
    /// - `TASKLOOM_BACKEND` replaces `default_backend`
    /// - `TASKLOOM_MODEL` replaces `default_model`
    /// - `<NAME>_API_KEY` fills the key of any referenced backend that has none
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from a specific path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(backend) = lookup("TASKLOOM_BACKEND") {
            self.default_backend = backend;
        }
        if let Some(model) = lookup("TASKLOOM_MODEL") {
            self.default_model = Some(model);
        }

        for name in self.referenced_backends() {
            let has_key = self
                .backends
                .get(&name)
                .is_some_and(|b| b.api_key.is_some());
            if has_key {
                continue;
            }
            if let Some(key) = lookup(&api_key_env_var(&name)) {
                self.backends.entry(name).or_default().api_key = Some(key);
            }
        }
    }

    /// Every backend name mentioned anywhere in the config, sorted.
    pub fn referenced_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.push(self.default_backend.clone());
        names.push(self.planner_backend().to_string());
        names.extend(self.roles.values().filter_map(|r| r.backend.clone()));
        names.sort();
        names.dedup();
        names
    }

    /// The backend a role runs on.
    pub fn role_backend<'a>(&'a self, role: &'a RoleConfig) -> &'a str {
        role.backend.as_deref().unwrap_or(&self.default_backend)
    }

    pub fn planner_backend(&self) -> &str {
        self.planner.backend.as_deref().unwrap_or(&self.default_backend)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskloom")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.planner.max_outer_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "planner.max_outer_iterations must be at least 1".into(),
            ));
        }
        for (name, backend) in &self.backends {
            if let Some(kind) = &backend.kind
                && !matches!(kind.as_str(), "openai" | "anthropic" | "gemini")
            {
                return Err(ConfigError::ValidationError(format!(
                    "backends.{name}.kind must be one of openai, anthropic, gemini (got '{kind}')"
                )));
            }
        }
        Ok(())
    }

    /// Generate a default config TOML string (for `init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_backend: default_backend(),
            default_model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            backends: HashMap::new(),
            retry: RetryConfig::default(),
            agent: AgentConfig::default(),
            planner: PlannerConfig::default(),
            roles: default_roles(),
        }
    }
}

/// The environment variable holding a backend's credential,
/// e.g. `openai` → `OPENAI_API_KEY`, `my-proxy` → `MY_PROXY_API_KEY`.
pub fn api_key_env_var(backend: &str) -> String {
    format!("{}_API_KEY", backend.to_ascii_uppercase().replace('-', "_"))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
