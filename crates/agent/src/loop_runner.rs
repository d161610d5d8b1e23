//! The agent loop: request, parse, act, repeat.
//!
//! One run owns one [`Conversation`]. Each cycle sends the whole
//! conversation to the backend, appends the reply, and then either finishes
//! (`done`), executes the requested actions and feeds their results back,
//! or asks the backend to try again in the expected format. Action batches
//! and clarifications both count against `max_iterations`.

use std::sync::Arc;
use std::time::Instant;
use async_trait::async_trait;
use chrono::Utc;
use taskloom_core::action::{Action, ActionExecutor, ActionKind, ActionResult, truncate_output};
use taskloom_core::backend::{Backend, BackendRequest};
use taskloom_core::error::{Error, Result};
use taskloom_core::event::{DomainEvent, EventBus};
use taskloom_core::message::{Conversation, Message};
use taskloom_core::task::{AgentOutcome, Task};
use taskloom_providers::RetryPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::prompts;
use crate::reply::{AssistantReply, parse_reply};

/// Runs sub-tasks requested through `delegate` actions.
#[async_trait]
pub trait Delegator: Send + Sync {
    /// Run `task` to completion at nesting level `depth`.
    async fn delegate(&self, task: Task, cancel: &CancellationToken, depth: u32) -> Result<AgentOutcome>;
}

/// Per-run inputs that are not part of the loop's configuration.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub cancel: &'a CancellationToken,
    pub delegator: Option<&'a dyn Delegator>,
    /// How many delegations deep this run is. Top-level runs are 0.
    pub depth: u32,
}

impl<'a> RunContext<'a> {
    pub fn new(cancel: &'a CancellationToken) -> Self {
        Self {
            cancel,
            delegator: None,
            depth: 0,
        }
    }

    pub fn with_delegator(mut self, delegator: &'a dyn Delegator, depth: u32) -> Self {
        self.delegator = Some(delegator);
        self.depth = depth;
        self
    }
}

/// The result of one agent loop run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub outcome: AgentOutcome,
    /// Backend requests made, never more than `max_iterations`.
    pub iterations: u32,
    pub conversation: Conversation,
}

/// The agent loop for one role, bound to one backend.
pub struct AgentLoop {
    /// The backend to ask
    backend: Arc<dyn Backend>,

    /// The model to request
    model: String,

    /// Temperature setting
    temperature: f32,

    /// Max tokens per response
    max_tokens: Option<u32>,

    /// Backoff around every backend call
    retry: RetryPolicy,

    /// Runs file and command actions
    executor: Arc<ActionExecutor>,

    /// Maximum request cycles per run
    max_iterations: u32,

    /// Role name used in logs and events
    role: String,

    /// Role persona prepended to the first message
    persona: Option<String>,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,

    /// Delegation is refused at or beyond this depth
    max_delegation_depth: u32,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        backend: Arc<dyn Backend>,
        model: impl Into<String>,
        executor: Arc<ActionExecutor>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            retry: RetryPolicy::none(),
            executor,
            max_iterations: 10,
            role: "agent".into(),
            persona: None,
            event_bus,
            max_delegation_depth: 2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the maximum number of request cycles. Values below 1 become 1.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>, persona: Option<String>) -> Self {
        self.role = role.into();
        self.persona = persona;
        self
    }

    pub fn with_max_delegation_depth(mut self, depth: u32) -> Self {
        self.max_delegation_depth = depth;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run `task` until the backend signals completion or the iteration
    /// budget runs out.
    ///
    /// Malformed replies and failed actions are fed back to the backend.
    /// Backend errors (after retries) and cancellation end the run with `Err`.
    pub async fn run(&self, task: &Task, ctx: RunContext<'_>) -> Result<AgentRun> {
        let mut conversation = Conversation::new();
        conversation.push(Message::user(prompts::task_message(
            self.persona.as_deref(),
            task.description(),
        )));

        info!(
            role = %self.role,
            backend = %self.backend.name(),
            model = %self.model,
            depth = ctx.depth,
            "Starting agent run"
        );

        let mut iterations = 0u32;

        loop {
            debug!(role = %self.role, iteration = iterations + 1, "Agent loop iteration");

            let reply = self.request(&conversation, ctx.cancel).await?;
            conversation.push(Message::assistant(&reply));

            match parse_reply(&reply) {
                AssistantReply::Completion { summary } => {
                    iterations += 1;
                    return Ok(self.finish(AgentOutcome::Done { summary }, iterations, conversation));
                }
                AssistantReply::ActionBatch { actions, reasoning } => {
                    if let Some(reasoning) = &reasoning {
                        debug!(role = %self.role, reasoning = %reasoning, "Backend reasoning");
                    }
                    let feedback = self.execute_batch(&actions, ctx).await?;
                    conversation.push(Message::user(feedback));
                }
                AssistantReply::Unrecognized => {
                    warn!(role = %self.role, "Reply matched neither response shape, asking again");
                    conversation.push(Message::user(prompts::CLARIFICATION));
                }
            }

            iterations += 1;
            if iterations >= self.max_iterations {
                warn!(role = %self.role, iterations, "Iteration budget exhausted");
                let outcome = AgentOutcome::Exhausted { last_content: reply };
                return Ok(self.finish(outcome, iterations, conversation));
            }
        }
    }

    /// One request with a single user message, returning the raw reply.
    pub async fn single_turn(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let mut conversation = Conversation::new();
        conversation.push(Message::user(prompt));
        self.request(&conversation, cancel).await
    }

    async fn request(&self, conversation: &Conversation, cancel: &CancellationToken) -> Result<String> {
        let mut request = BackendRequest::new(&self.model, conversation.messages().to_vec())
            .with_temperature(self.temperature);
        if let Some(max) = self.max_tokens {
            request = request.with_max_tokens(max);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.retry.call(self.backend.as_ref(), request) => result?,
        };

        self.event_bus.publish(DomainEvent::BackendResponded {
            backend: self.backend.name().to_string(),
            model: response.model.clone(),
            tokens_used: response.usage.as_ref().map_or(0, |u| u.total_tokens),
            timestamp: Utc::now(),
        });

        Ok(response.content)
    }

    /// Run each action in order and format the feedback message.
    async fn execute_batch(&self, actions: &[Action], ctx: RunContext<'_>) -> Result<String> {
        debug!(role = %self.role, count = actions.len(), "Executing actions");

        let mut feedback = String::from("Actions executed. Results:");
        for (i, action) in actions.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let start = Instant::now();
            let result = match action.kind {
                ActionKind::Delegate => self.delegate(action, ctx).await?,
                _ => self.executor.execute(action).await,
            };

            self.event_bus.publish(DomainEvent::ActionExecuted {
                role: self.role.clone(),
                action: action.kind.to_string(),
                success: result.success,
                duration_ms: start.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });

            let status = if result.success { "ok" } else { "failed" };
            feedback.push_str(&format!(
                "\n\n[{}] {} ({status}):\n{}",
                i + 1,
                action.kind,
                result.output
            ));
        }
        Ok(feedback)
    }

    async fn delegate(&self, action: &Action, ctx: RunContext<'_>) -> Result<ActionResult> {
        let (role, description) = match (action.require("role"), action.require("task")) {
            (Ok(role), Ok(task)) => (role, task),
            (Err(e), _) | (_, Err(e)) => return Ok(ActionResult::failed(e.to_string())),
        };

        let Some(delegator) = ctx.delegator else {
            return Ok(ActionResult::failed("Delegation is not available in this run"));
        };

        if ctx.depth >= self.max_delegation_depth {
            let refused = Error::DelegationDepth {
                depth: ctx.depth + 1,
                max: self.max_delegation_depth,
            };
            warn!(role = %self.role, target = %role, error = %refused, "Delegation refused");
            return Ok(ActionResult::failed(refused.to_string()));
        }

        info!(role = %self.role, target = %role, depth = ctx.depth + 1, "Delegating sub-task");

        match delegator
            .delegate(Task::new(role.clone(), description), ctx.cancel, ctx.depth + 1)
            .await
        {
            Ok(outcome) => {
                let label = if outcome.is_done() { "completed" } else { "ran out of iterations" };
                let text = format!("{role} {label}: {}", outcome.text());
                Ok(ActionResult {
                    success: outcome.is_done(),
                    output: truncate_output(&text, self.executor.max_result_chars()),
                })
            }
            // A made-up role is the backend's mistake, not a broken setup
            Err(Error::UnknownRole(unknown)) => {
                Ok(ActionResult::failed(format!("Unknown role: {unknown}")))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(ActionResult::failed(format!("Delegation to {role} failed: {e}"))),
        }
    }

    fn finish(&self, outcome: AgentOutcome, iterations: u32, conversation: Conversation) -> AgentRun {
        info!(role = %self.role, done = outcome.is_done(), iterations, "Agent run finished");
        self.event_bus.publish(DomainEvent::AgentFinished {
            role: self.role.clone(),
            done: outcome.is_done(),
            iterations,
            timestamp: Utc::now(),
        });
        AgentRun {
            outcome,
            iterations,
            conversation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::json;
    use std::sync::Mutex;
    use taskloom_core::error::BackendError;
    use taskloom_core::message::Role;

    fn executor(dir: &std::path::Path) -> Arc<ActionExecutor> {
        Arc::new(taskloom_actions::default_executor(
            &taskloom_config::AgentConfig::default(),
            dir.to_path_buf(),
        ))
    }

    fn agent(backend: Arc<SequentialMockBackend>, dir: &std::path::Path) -> AgentLoop {
        AgentLoop::new(backend, "mock-model", executor(dir), Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn creates_file_then_finishes_in_two_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![
            actions(&[("write_file", json!({"path": "hello.txt", "content": "hi"}))]),
            done("Created hello.txt"),
        ]));

        let cancel = CancellationToken::new();
        let run = agent(backend.clone(), dir.path())
            .run(&Task::new("backend", "create hello.txt with content 'hi'"), RunContext::new(&cancel))
            .await
            .unwrap();

        assert_eq!(run.outcome, AgentOutcome::Done { summary: "Created hello.txt".into() });
        assert_eq!(run.iterations, 2);
        assert_eq!(backend.call_count(), 2);
        assert_eq!(std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(), "hi");

        // task, actions, feedback, done
        let messages = run.conversation.messages();
        assert_eq!(messages.len(), 4);
        assert!(messages[0].content.ends_with("Task: create hello.txt with content 'hi'"));
        assert_eq!(messages[2].role, Role::User);
        assert!(messages[2].content.starts_with("Actions executed. Results:"));
        assert!(messages[2].content.contains("[1] write_file (ok):\nWrote 2 bytes to hello.txt"));
    }

    #[tokio::test]
    async fn done_terminates_regardless_of_budget() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![done("X")]));
        let cancel = CancellationToken::new();

        let run = agent(backend, dir.path())
            .with_max_iterations(50)
            .run(&Task::new("backend", "anything"), RunContext::new(&cancel))
            .await
            .unwrap();

        assert_eq!(run.outcome, AgentOutcome::Done { summary: "X".into() });
        assert_eq!(run.iterations, 1);
    }

    #[tokio::test]
    async fn unrecognized_reply_gets_one_clarification() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![
            "I'll get started on that right away.".into(),
            done("ok"),
        ]));
        let cancel = CancellationToken::new();

        let run = agent(backend.clone(), dir.path())
            .run(&Task::new("backend", "t"), RunContext::new(&cancel))
            .await
            .unwrap();

        assert!(run.outcome.is_done());
        let messages = run.conversation.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].content, prompts::CLARIFICATION);

        // The second request saw the clarification
        let second = &backend.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[2].content, prompts::CLARIFICATION);
    }

    #[tokio::test]
    async fn budget_bounds_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![
            "nope".into(),
            actions(&[("run_command", json!({"command": "echo step"}))]),
            "still nope".into(),
        ]));
        let cancel = CancellationToken::new();

        let run = agent(backend.clone(), dir.path())
            .with_max_iterations(3)
            .run(&Task::new("backend", "t"), RunContext::new(&cancel))
            .await
            .unwrap();

        assert_eq!(run.outcome, AgentOutcome::Exhausted { last_content: "still nope".into() });
        assert_eq!(run.iterations, 3);
        assert_eq!(backend.call_count(), 3);
        assert_eq!(run.conversation.len(), 7);
    }

    #[tokio::test]
    async fn zero_budget_still_makes_one_request() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec!["nope".into()]));
        let cancel = CancellationToken::new();

        let run = agent(backend.clone(), dir.path())
            .with_max_iterations(0)
            .run(&Task::new("backend", "t"), RunContext::new(&cancel))
            .await
            .unwrap();

        assert!(!run.outcome.is_done());
        assert_eq!(backend.call_count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_fed_back() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![
            actions(&[("run-command", json!({"command": "echo oops >&2; exit 7"}))]),
            done("gave up"),
        ]));
        let cancel = CancellationToken::new();

        let run = agent(backend.clone(), dir.path())
            .run(&Task::new("backend", "t"), RunContext::new(&cancel))
            .await
            .unwrap();

        assert!(run.outcome.is_done());
        let feedback = &backend.requests()[1].messages[2].content;
        assert!(feedback.contains("[1] run_command (failed):\n[exit code: 7]"));
        assert!(feedback.contains("oops"));
    }

    #[tokio::test]
    async fn actions_run_in_order_and_unknown_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![
            actions(&[
                ("write_file", json!({"path": "a/b.txt", "content": "first"})),
                ("deploy", json!({"target": "prod"})),
                ("read_file", json!({"path": "a/b.txt"})),
            ]),
            done("ok"),
        ]));
        let cancel = CancellationToken::new();

        agent(backend.clone(), dir.path())
            .run(&Task::new("backend", "t"), RunContext::new(&cancel))
            .await
            .unwrap();

        let feedback = &backend.requests()[1].messages[2].content;
        assert!(feedback.contains("[2] deploy (failed):\nUnknown action: deploy"));
        assert!(feedback.contains("[3] read_file (ok):\nfirst"));
    }

    #[tokio::test]
    async fn conversation_only_grows() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![
            "?".into(),
            actions(&[("read_file", json!({"path": "missing.txt"}))]),
            done("ok"),
        ]));
        let cancel = CancellationToken::new();

        agent(backend.clone(), dir.path())
            .run(&Task::new("backend", "t"), RunContext::new(&cancel))
            .await
            .unwrap();

        let lengths: Vec<usize> = backend.requests().iter().map(|r| r.messages.len()).collect();
        assert_eq!(lengths, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn auth_error_ends_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::scripted(vec![Err(BackendError::Auth(
            "bad key".into(),
        ))]));
        let cancel = CancellationToken::new();

        let err = agent(backend, dir.path())
            .run(&Task::new("backend", "t"), RunContext::new(&cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(BackendError::Auth(_))));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_request() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![done("never")]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = agent(backend, dir.path())
            .run(&Task::new("backend", "t"), RunContext::new(&cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn events_are_published() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![
            actions(&[("write_file", json!({"path": "x", "content": ""}))]),
            done("ok"),
        ]));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let cancel = CancellationToken::new();

        AgentLoop::new(backend, "mock-model", executor(dir.path()), bus)
            .with_role("db", None)
            .run(&Task::new("db", "t"), RunContext::new(&cancel))
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event.as_ref() {
                DomainEvent::BackendResponded { .. } => "responded",
                DomainEvent::ActionExecuted { .. } => "action",
                DomainEvent::AgentFinished { role, done, .. } => {
                    assert_eq!(role, "db");
                    assert!(*done);
                    "finished"
                }
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["responded", "action", "responded", "finished"]);
    }

    /// Records delegated tasks and completes them immediately.
    struct RecordingDelegator {
        seen: Mutex<Vec<(String, String, u32)>>,
    }

    #[async_trait]
    impl Delegator for RecordingDelegator {
        async fn delegate(&self, task: Task, _cancel: &CancellationToken, depth: u32) -> Result<AgentOutcome> {
            if task.role() == "ghost" {
                return Err(Error::UnknownRole("ghost".into()));
            }
            self.seen
                .lock()
                .unwrap()
                .push((task.role().to_string(), task.description().to_string(), depth));
            Ok(AgentOutcome::Done { summary: "migrations applied".into() })
        }
    }

    #[tokio::test]
    async fn delegate_action_reaches_delegator() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![
            actions(&[
                ("delegate", json!({"role": "db", "task": "run migrations"})),
                ("delegate", json!({"role": "ghost", "task": "boo"})),
            ]),
            done("ok"),
        ]));
        let delegator = RecordingDelegator { seen: Mutex::new(Vec::new()) };
        let cancel = CancellationToken::new();

        agent(backend.clone(), dir.path())
            .run(
                &Task::new("backend", "t"),
                RunContext::new(&cancel).with_delegator(&delegator, 0),
            )
            .await
            .unwrap();

        assert_eq!(
            *delegator.seen.lock().unwrap(),
            vec![("db".to_string(), "run migrations".to_string(), 1)]
        );
        let feedback = &backend.requests()[1].messages[2].content;
        assert!(feedback.contains("[1] delegate (ok):\ndb completed: migrations applied"));
        assert!(feedback.contains("[2] delegate (failed):\nUnknown role: ghost"));
    }

    #[tokio::test]
    async fn delegation_depth_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![
            actions(&[("delegate", json!({"role": "db", "task": "deeper"}))]),
            done("ok"),
        ]));
        let delegator = RecordingDelegator { seen: Mutex::new(Vec::new()) };
        let cancel = CancellationToken::new();

        agent(backend.clone(), dir.path())
            .with_max_delegation_depth(2)
            .run(
                &Task::new("backend", "t"),
                RunContext::new(&cancel).with_delegator(&delegator, 2),
            )
            .await
            .unwrap();

        assert!(delegator.seen.lock().unwrap().is_empty());
        let feedback = &backend.requests()[1].messages[2].content;
        assert!(feedback.contains("[1] delegate (failed):\nDelegation depth 3 exceeds the limit of 2"));
    }

    #[tokio::test]
    async fn delegate_without_delegator_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec![
            actions(&[("delegate", json!({"role": "db", "task": "x"}))]),
            done("ok"),
        ]));
        let cancel = CancellationToken::new();

        agent(backend.clone(), dir.path())
            .run(&Task::new("backend", "t"), RunContext::new(&cancel))
            .await
            .unwrap();

        let feedback = &backend.requests()[1].messages[2].content;
        assert!(feedback.contains("delegate (failed):\nDelegation is not available"));
    }

    #[tokio::test]
    async fn single_turn_returns_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SequentialMockBackend::new(vec!["plain answer".into()]));
        let cancel = CancellationToken::new();

        let text = agent(backend.clone(), dir.path())
            .single_turn("hello", &cancel)
            .await
            .unwrap();
        assert_eq!(text, "plain answer");
        assert_eq!(backend.requests()[0].messages.len(), 1);
    }
}
