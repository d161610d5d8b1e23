//! Dispatcher: maps a role to a backend and runs an agent loop for it.
//!
//! Role and backend selection is read once from configuration. The
//! dispatcher is also the [`Delegator`] for `delegate` actions, so a
//! sub-agent runs through the same path as a planned task, one level deeper.

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use taskloom_config::AppConfig;
use taskloom_core::action::ActionExecutor;
use taskloom_core::error::{Error, Result};
use taskloom_core::event::EventBus;
use taskloom_core::task::{AgentOutcome, Task};
use taskloom_providers::{BackendRegistry, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::loop_runner::{AgentLoop, AgentRun, Delegator, RunContext};

/// A role with its backend already resolved.
struct RoleRoute {
    backend: String,
    model: Option<String>,
    persona: String,
}

pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    roles: HashMap<String, RoleRoute>,
    default_model: Option<String>,
    temperature: f32,
    max_tokens: u32,
    max_iterations: u32,
    max_delegation_depth: u32,
    retry: RetryPolicy,
    executor: Arc<ActionExecutor>,
    event_bus: Arc<EventBus>,
}

impl Dispatcher {
    pub fn from_config(
        config: &AppConfig,
        registry: Arc<BackendRegistry>,
        executor: Arc<ActionExecutor>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            roles: config
                .roles
                .iter()
                .map(|(name, role)| {
                    let route = RoleRoute {
                        backend: config.role_backend(role).to_string(),
                        model: role.model.clone(),
                        persona: role.persona.clone(),
                    };
                    (name.clone(), route)
                })
                .collect(),
            default_model: config.default_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_iterations: config.agent.max_iterations,
            max_delegation_depth: config.agent.max_delegation_depth,
            retry: RetryPolicy::from_config(&config.retry).with_events(event_bus.clone()),
            executor,
            event_bus,
        }
    }

    /// Configured role names, sorted.
    pub fn roles(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.roles.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    pub fn persona(&self, role: &str) -> Option<&str> {
        self.roles.get(role).map(|r| r.persona.as_str())
    }

    pub fn executor(&self) -> Arc<ActionExecutor> {
        self.executor.clone()
    }

    /// Build the agent loop for `role`.
    ///
    /// Fails with `UnknownRole` if the role is not configured, then with
    /// `UnknownBackend` if its backend is not registered.
    pub fn agent_for(&self, role: &str) -> Result<AgentLoop> {
        let route = self
            .roles
            .get(role)
            .ok_or_else(|| Error::UnknownRole(role.to_string()))?;

        let backend_name = route.backend.as_str();
        let backend = self
            .registry
            .get(backend_name)
            .ok_or_else(|| Error::UnknownBackend(backend_name.to_string()))?;

        let model = route
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .unwrap_or_else(|| backend.default_model().to_string());

        debug!(role = %role, backend = %backend_name, model = %model, "Resolved agent");

        let persona = Some(route.persona.clone()).filter(|p| !p.trim().is_empty());
        Ok(AgentLoop::new(backend, model, self.executor.clone(), self.event_bus.clone())
            .with_role(role, persona)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_retry(self.retry.clone())
            .with_max_iterations(self.max_iterations)
            .with_max_delegation_depth(self.max_delegation_depth))
    }

    /// Run `task` on its role's backend and return how it ended.
    pub async fn dispatch(&self, task: &Task, cancel: &CancellationToken) -> Result<AgentOutcome> {
        Ok(self.dispatch_run(task, cancel, 0).await?.outcome)
    }

    /// Like [`dispatch`](Self::dispatch), keeping the full run and the
    /// nesting level for delegated tasks.
    pub async fn dispatch_run(&self, task: &Task, cancel: &CancellationToken, depth: u32) -> Result<AgentRun> {
        let agent = self.agent_for(task.role())?;
        info!(role = %task.role(), depth, "Dispatching task");
        agent
            .run(task, RunContext::new(cancel).with_delegator(self, depth))
            .await
    }
}

#[async_trait]
impl Delegator for Dispatcher {
    async fn delegate(&self, task: Task, cancel: &CancellationToken, depth: u32) -> Result<AgentOutcome> {
        Ok(self.dispatch_run(&task, cancel, depth).await?.outcome)
    }
}
