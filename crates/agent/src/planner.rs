//! Planner: decompose a goal, dispatch the tasks, judge the result.
//!
//! # Architecture
//!
//! ```text
//!        Goal
//!          │
//!          ▼
//!   ┌─────────────┐
//!   │  Decompose   │  ← one planner turn: {"tasks": [...]}
//!   └──────┬───────┘
//!          ▼
//!   ┌─────────────┐
//!   │  Dispatch    │  ← each task, in order, through its role's agent loop
//!   └──────┬───────┘
//!          ▼
//!   ┌─────────────┐
//!   │  Summarize   │  ← one planner turn: {"summary", "status", "next_prompt"}
//!   └──────┬───────┘
//!          ▼
//!   complete / single shot / limit → stop
//!   otherwise → cooldown, next goal, repeat
//! ```
//!
//! There is no correction loop at this level: a reply that is not a usable
//! task list or verdict ends the run with `MalformedPlan`.

use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use taskloom_config::AppConfig;
use taskloom_core::error::{Error, Result};
use taskloom_core::event::{DomainEvent, EventBus};
use taskloom_core::task::{PlanStep, Task};
use taskloom_providers::{BackendRegistry, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::loop_runner::AgentLoop;
use crate::prompts;
use crate::reply::extract_json_object;

/// Mutable planner state, owned by one `run`.
#[derive(Debug, Clone)]
pub struct IterationState {
    pub current_goal: String,
    /// 1-based outer iteration number
    pub iteration: u32,
    pub auto_mode: bool,
}

/// Why the planner stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The summarizer reported the goal complete.
    Complete,
    /// Auto-continuation was off, so one iteration was run.
    SingleShot,
    /// Auto mode reached `max_outer_iterations`.
    IterationLimit,
}

/// One decompose → dispatch → summarize cycle.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub summary: String,
    pub complete: bool,
}

/// The result of a planner run.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerRun {
    pub iterations: Vec<IterationRecord>,
    pub stop: StopReason,
}

impl PlannerRun {
    /// The last summary produced.
    pub fn summary(&self) -> &str {
        self.iterations.last().map_or("", |r| r.summary.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct TaskList {
    tasks: Vec<PlannedTask>,
}

#[derive(Debug, Deserialize)]
struct PlannedTask {
    #[serde(alias = "role")]
    agent: String,
    #[serde(alias = "task", alias = "description")]
    task_description: String,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    summary: String,
    status: String,
    #[serde(default)]
    next_prompt: String,
}

pub struct Planner {
    /// Planner-side turns (decompose and summarize)
    agent: AgentLoop,
    dispatcher: Arc<Dispatcher>,
    auto_continue: bool,
    max_outer_iterations: u32,
    cooldown: Duration,
    event_bus: Arc<EventBus>,
}

impl Planner {
    pub fn new(agent: AgentLoop, dispatcher: Arc<Dispatcher>, event_bus: Arc<EventBus>) -> Self {
        Self {
            agent,
            dispatcher,
            auto_continue: false,
            max_outer_iterations: 10,
            cooldown: Duration::from_secs(5),
            event_bus,
        }
    }

    /// Build a planner on the configured planner backend.
    pub fn from_config(
        config: &AppConfig,
        registry: &BackendRegistry,
        dispatcher: Arc<Dispatcher>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        let backend_name = config.planner_backend();
        let backend = registry
            .get(backend_name)
            .ok_or_else(|| Error::UnknownBackend(backend_name.to_string()))?;

        let model = config
            .planner
            .model
            .clone()
            .or_else(|| config.default_model.clone())
            .unwrap_or_else(|| backend.default_model().to_string());

        let agent = AgentLoop::new(backend, model, dispatcher.executor(), event_bus.clone())
            .with_role("planner", None)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_retry(RetryPolicy::from_config(&config.retry).with_events(event_bus.clone()));

        Ok(Self::new(agent, dispatcher, event_bus)
            .with_auto_continue(config.planner.auto_continue)
            .with_max_outer_iterations(config.planner.max_outer_iterations)
            .with_cooldown(Duration::from_secs(config.planner.cooldown_secs)))
    }

    pub fn with_auto_continue(mut self, enabled: bool) -> Self {
        self.auto_continue = enabled;
        self
    }

    /// Values below 1 become 1.
    pub fn with_max_outer_iterations(mut self, max: u32) -> Self {
        self.max_outer_iterations = max.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Drive outer iterations until the goal is complete, auto mode is off,
    /// or the iteration limit is reached.
    ///
    /// Unknown roles, malformed planner replies, fatal backend errors and
    /// cancellation end the run with `Err`.
    pub async fn run(&self, goal: &str, cancel: &CancellationToken) -> Result<PlannerRun> {
        let mut state = IterationState {
            current_goal: goal.to_string(),
            iteration: 1,
            auto_mode: self.auto_continue,
        };
        let mut records = Vec::new();

        loop {
            info!(
                iteration = state.iteration,
                auto = state.auto_mode,
                goal = %state.current_goal,
                "Planner: starting iteration"
            );

            // ── Step 1: Decompose ──
            let tasks = self.decompose(&state.current_goal, cancel).await?;
            debug!(tasks = tasks.len(), "Planner: goal decomposed");

            // ── Step 2: Dispatch, in order ──
            let mut steps = Vec::with_capacity(tasks.len());
            for task in tasks {
                let outcome = self.dispatcher.dispatch(&task, cancel).await?;
                info!(role = %task.role(), done = outcome.is_done(), "Planner: task finished");
                steps.push(PlanStep { task, outcome });
            }

            // ── Step 3: Summarize ──
            let verdict = self.summarize(&state.current_goal, &steps, cancel).await?;
            let complete = verdict.status == "complete";

            self.event_bus.publish(DomainEvent::PlannerIteration {
                iteration: state.iteration,
                tasks: steps.len(),
                complete,
                timestamp: Utc::now(),
            });

            records.push(IterationRecord {
                iteration: state.iteration,
                goal: state.current_goal.clone(),
                steps,
                summary: verdict.summary,
                complete,
            });

            // ── Step 4: Continue or stop ──
            let stop = if complete {
                Some(StopReason::Complete)
            } else if !state.auto_mode {
                Some(StopReason::SingleShot)
            } else if state.iteration >= self.max_outer_iterations {
                warn!(limit = self.max_outer_iterations, "Planner: outer iteration limit reached");
                Some(StopReason::IterationLimit)
            } else {
                None
            };

            if let Some(stop) = stop {
                info!(iterations = records.len(), stop = ?stop, "Planner: complete");
                return Ok(PlannerRun {
                    iterations: records,
                    stop,
                });
            }

            let next = verdict.next_prompt.trim();
            if !next.is_empty() {
                state.current_goal = next.to_string();
            }
            state.iteration += 1;

            debug!(cooldown_ms = self.cooldown.as_millis() as u64, "Planner: cooling down");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.cooldown) => {}
            }
        }
    }

    /// Ask for a task list and check every role before anything runs.
    async fn decompose(&self, goal: &str, cancel: &CancellationToken) -> Result<Vec<Task>> {
        let roles: Vec<(&str, &str)> = self
            .dispatcher
            .roles()
            .into_iter()
            .map(|r| (r, self.dispatcher.persona(r).unwrap_or_default()))
            .collect();

        let reply = self
            .agent
            .single_turn(&prompts::decomposition(goal, &roles), cancel)
            .await?;

        let value = extract_json_object(&reply)
            .ok_or_else(|| Error::MalformedPlan("no JSON object in decomposition reply".into()))?;
        let list: TaskList = serde_json::from_value(value)
            .map_err(|e| Error::MalformedPlan(format!("bad task list: {e}")))?;

        if list.tasks.is_empty() {
            return Err(Error::MalformedPlan("task list is empty".into()));
        }

        let tasks: Vec<Task> = list
            .tasks
            .into_iter()
            .map(|t| Task::new(t.agent.trim(), t.task_description))
            .collect();

        if let Some(unknown) = tasks.iter().find(|t| !self.dispatcher.has_role(t.role())) {
            return Err(Error::UnknownRole(unknown.role().to_string()));
        }

        Ok(tasks)
    }

    async fn summarize(&self, goal: &str, steps: &[PlanStep], cancel: &CancellationToken) -> Result<Verdict> {
        let reply = self
            .agent
            .single_turn(&prompts::summarization(goal, steps), cancel)
            .await?;

        let value = extract_json_object(&reply)
            .ok_or_else(|| Error::MalformedPlan("no JSON object in summary reply".into()))?;
        let mut verdict: Verdict = serde_json::from_value(value)
            .map_err(|e| Error::MalformedPlan(format!("bad summary: {e}")))?;

        verdict.status = verdict.status.trim().to_ascii_lowercase();
        match verdict.status.as_str() {
            "complete" | "incomplete" => Ok(verdict),
            other => Err(Error::MalformedPlan(format!("unknown status '{other}'"))),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
