//! Action model: the side-effecting operations an agent may request.
//!
//! An [`Action`] is parsed from assistant output, dispatched by the
//! [`ActionExecutor`] to a registered [`ActionHandler`], and turned into an
//! [`ActionResult`] that is fed back to the backend as text. Nothing that
//! happens inside a handler aborts the agent loop: failures come back as data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use crate::error::ActionError;

/// The fixed action vocabulary, plus a catch-all for anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    RunCommand,
    ReadFile,
    WriteFile,
    /// Spawn a sub-task for another role. Handled by the agent loop.
    Delegate,
    Unknown(String),
}

impl ActionKind {
    /// Parse an action type. `run-command`, `run_command` and `Run-Command`
    /// all name the same action.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "run_command" => ActionKind::RunCommand,
            "read_file" => ActionKind::ReadFile,
            "write_file" => ActionKind::WriteFile,
            "delegate" => ActionKind::Delegate,
            _ => ActionKind::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::RunCommand => "run_command",
            ActionKind::ReadFile => "read_file",
            ActionKind::WriteFile => "write_file",
            ActionKind::Delegate => "delegate",
            ActionKind::Unknown(raw) => raw,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested action with its named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Action {
    pub fn new(kind: ActionKind, params: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { kind, params }
    }

    /// Build an action from one element of an `actions` array.
    ///
    /// Accepts `{"type": ..., "params": {...}}`. When `params` is absent the
    /// remaining top-level fields are used instead.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::new(ActionKind::Unknown(value.to_string()), Default::default());
        };

        let kind = obj
            .get("type")
            .and_then(|t| t.as_str())
            .map(ActionKind::parse)
            .unwrap_or_else(|| ActionKind::Unknown("<missing type>".into()));

        let params = match obj.get("params").and_then(|p| p.as_object()) {
            Some(params) => params.clone(),
            None => obj
                .iter()
                .filter(|(k, _)| k.as_str() != "type" && k.as_str() != "params")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        Self { kind, params }
    }

    /// A string parameter. Numbers and booleans are rendered as text.
    pub fn param(&self, name: &str) -> Option<String> {
        match self.params.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn require(&self, name: &str) -> Result<String, ActionError> {
        self.param(name).ok_or_else(|| {
            ActionError::InvalidParams(format!("{} requires a '{name}' parameter", self.kind))
        })
    }
}

/// The textual outcome of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Whether the action did what was asked
    pub success: bool,

    /// Captured output, file contents, or a confirmation
    pub output: String,
}

impl ActionResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { success: true, output: output.into() }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self { success: false, output: output.into() }
    }
}

/// Where an action runs.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub workdir: PathBuf,
}

impl ActionContext {
    /// Resolve a path parameter: relative paths land under the workdir.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.workdir.join(p)
        }
    }
}

/// A handler for one action type.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> ActionKind;

    async fn execute(&self, action: &Action, ctx: &ActionContext) -> Result<ActionResult, ActionError>;
}

/// Routes actions to their handlers and normalizes every outcome into an
/// [`ActionResult`].
pub struct ActionExecutor {
    handlers: HashMap<ActionKind, Box<dyn ActionHandler>>,
    ctx: ActionContext,
    max_result_chars: usize,
}

impl ActionExecutor {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            handlers: HashMap::new(),
            ctx: ActionContext { workdir: workdir.into() },
            max_result_chars: 8_000,
        }
    }

    /// Cap the length of each result's text.
    pub fn with_max_result_chars(mut self, max: usize) -> Self {
        self.max_result_chars = max;
        self
    }

    /// Register a handler. Replaces any existing handler for the same kind.
    pub fn register(&mut self, handler: Box<dyn ActionHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn workdir(&self) -> &Path {
        &self.ctx.workdir
    }

    pub fn max_result_chars(&self) -> usize {
        self.max_result_chars
    }

    /// List all registered action names.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(|k| k.as_str()).collect()
    }

    /// Execute one action. Never fails: unknown types and handler errors
    /// come back as failed results.
    pub async fn execute(&self, action: &Action) -> ActionResult {
        let Some(handler) = self.handlers.get(&action.kind) else {
            warn!(action = %action.kind, "Unknown action requested");
            return ActionResult::failed(format!("Unknown action: {}", action.kind));
        };

        debug!(action = %action.kind, "Executing action");
        let result = match handler.execute(action, &self.ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(action = %action.kind, error = %e, "Action failed");
                ActionResult::failed(e.to_string())
            }
        };

        ActionResult {
            success: result.success,
            output: truncate_output(&result.output, self.max_result_chars),
        }
    }
}

/// Truncate text to at most `max` chars, noting how many were cut.
pub fn truncate_output(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        None => text.to_string(),
        Some((cut, _)) => {
            let dropped = text[cut..].chars().count();
            format!("{}…[truncated {dropped} chars]", &text[..cut])
        }
    }
}
