//! End-to-end integration tests for the Taskloom engine.
//!
//! These tests exercise the full pipeline from configuration to finished
//! files on disk: dispatcher, agent loop, retry policy, action executor and
//! planner, with a scripted backend standing in for the network.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskloom_agent::{Dispatcher, Planner, StopReason};
use taskloom_config::AppConfig;
use taskloom_core::backend::{Backend, BackendRequest, BackendResponse, Usage};
use taskloom_core::error::{BackendError, Error};
use taskloom_core::event::{DomainEvent, EventBus};
use taskloom_core::task::{AgentOutcome, Task};
use taskloom_providers::{BackendKind, BackendRegistry};
use tokio_util::sync::CancellationToken;

// ── Scripted Backend ─────────────────────────────────────────────────────

/// A backend that returns scripted replies in sequence.
struct ScriptedBackend {
    replies: Mutex<Vec<Result<String, BackendError>>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<Result<String, BackendError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn text(replies: Vec<String>) -> Self {
        Self::new(replies.into_iter().map(Ok).collect())
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> BackendRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait::async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn send(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let mut requests = self.requests.lock().unwrap();
        let replies = self.replies.lock().unwrap();
        let call = requests.len();
        if call >= replies.len() {
            panic!("ScriptedBackend exhausted: call #{call}, have {}", replies.len());
        }
        requests.push(request);
        replies[call].clone().map(|content| BackendResponse {
            content,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "scripted-model".into(),
        })
    }
}

fn done(summary: &str) -> String {
    serde_json::json!({"done": true, "summary": summary}).to_string()
}

fn actions(list: serde_json::Value) -> String {
    serde_json::json!({"actions": list}).to_string()
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.default_backend = "scripted".into();
    config.retry.base_delay_ms = 100;
    config
}

struct Harness {
    config: AppConfig,
    registry: Arc<BackendRegistry>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<EventBus>,
}

fn harness(config: AppConfig, backend: Arc<ScriptedBackend>, dir: &std::path::Path) -> Harness {
    let mut registry = BackendRegistry::new();
    registry.register(backend, BackendKind::OpenAi, true);
    let registry = Arc::new(registry);
    let events = Arc::new(EventBus::default());
    let executor = Arc::new(taskloom_actions::default_executor(&config.agent, dir.to_path_buf()));
    let dispatcher = Arc::new(Dispatcher::from_config(
        &config,
        registry.clone(),
        executor,
        events.clone(),
    ));
    Harness {
        config,
        registry,
        dispatcher,
        events,
    }
}

// ── E2E: Agent Loop through the Dispatcher ───────────────────────────────

#[tokio::test]
async fn e2e_create_hello_txt() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::text(vec![
        actions(serde_json::json!([
            {"type": "write_file", "params": {"path": "hello.txt", "content": "hi"}}
        ])),
        done("Created hello.txt"),
    ]));
    let h = harness(config(), backend.clone(), dir.path());

    let run = h
        .dispatcher
        .dispatch_run(
            &Task::new("backend", "create hello.txt with content 'hi'"),
            &CancellationToken::new(),
            0,
        )
        .await
        .unwrap();

    assert_eq!(run.outcome, AgentOutcome::Done { summary: "Created hello.txt".into() });
    assert_eq!(run.iterations, 2);
    assert_eq!(backend.calls(), 2);
    assert_eq!(std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(), "hi");

    let feedback = &backend.request(1).messages[2].content;
    assert!(feedback.starts_with("Actions executed. Results:"));
    assert!(feedback.contains("Wrote 2 bytes to hello.txt"));
}

#[tokio::test]
async fn e2e_write_then_read_in_one_batch() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::text(vec![
        actions(serde_json::json!([
            {"type": "write-file", "params": {"path": "src/deep/notes.md", "content": "line one\nline two"}},
            {"type": "read-file", "params": {"path": "src/deep/notes.md"}}
        ])),
        done("notes written"),
    ]));
    let h = harness(config(), backend.clone(), dir.path());

    h.dispatcher
        .dispatch(&Task::new("backend", "write notes"), &CancellationToken::new())
        .await
        .unwrap();

    let feedback = &backend.request(1).messages[2].content;
    assert!(feedback.contains("[2] read_file (ok):\nline one\nline two"));
}

#[tokio::test]
async fn e2e_budget_exhausted_after_malformed_replies() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.agent.max_iterations = 2;
    let backend = Arc::new(ScriptedBackend::text(vec![
        "Working on it.".into(),
        "Still working on it.".into(),
    ]));
    let h = harness(cfg, backend.clone(), dir.path());

    let outcome = h
        .dispatcher
        .dispatch(&Task::new("reviewer", "review"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, AgentOutcome::Exhausted { last_content: "Still working on it.".into() });
    assert_eq!(backend.calls(), 2);
}

// ── E2E: Retry Policy ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_rate_limits_are_retried_with_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new(vec![
        Err(BackendError::rate_limited("slow down")),
        Err(BackendError::rate_limited("slow down")),
        Err(BackendError::rate_limited("slow down")),
        Ok(done("made it")),
    ]));
    let h = harness(config(), backend.clone(), dir.path());
    let mut rx = h.events.subscribe();

    let outcome = h
        .dispatcher
        .dispatch(&Task::new("db", "t"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.text(), "made it");
    assert_eq!(backend.calls(), 4);

    let mut delays = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let DomainEvent::BackendRetry { delay_ms, .. } = event.as_ref() {
            delays.push(*delay_ms);
        }
    }
    assert_eq!(delays, vec![100, 200, 400]);
}

#[tokio::test(start_paused = true)]
async fn e2e_persistent_rate_limit_fails_after_attempt_limit() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.retry.max_attempts = 2;
    let backend = Arc::new(ScriptedBackend::new(vec![
        Err(BackendError::rate_limited("slow down")),
        Err(BackendError::rate_limited("still slow")),
    ]));
    let h = harness(cfg, backend.clone(), dir.path());

    let err = h
        .dispatcher
        .dispatch(&Task::new("db", "t"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(backend.calls(), 2);
    assert!(err.to_string().contains("still slow"));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn e2e_auth_error_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new(vec![Err(BackendError::Auth(
        "invalid key".into(),
    ))]));
    let h = harness(config(), backend.clone(), dir.path());

    let err = h
        .dispatcher
        .dispatch(&Task::new("db", "t"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Backend(BackendError::Auth(_))));
    assert_eq!(backend.calls(), 1);
}

// ── E2E: Planner ─────────────────────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn e2e_planner_decompose_dispatch_summarize() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::text(vec![
        // decompose
        serde_json::json!({"tasks": [
            {"agent": "db", "task_description": "write schema.sql"},
            {"agent": "backend", "task_description": "check the schema exists"}
        ]})
        .to_string(),
        // db agent
        actions(serde_json::json!([
            {"type": "write_file", "params": {"path": "schema.sql", "content": "CREATE TABLE todos (id INTEGER);"}}
        ])),
        done("schema written"),
        // backend agent
        actions(serde_json::json!([
            {"type": "run_command", "params": {"command": "cat schema.sql"}}
        ])),
        done("schema verified"),
        // summarize
        serde_json::json!({"summary": "Schema created and verified", "status": "complete", "next_prompt": ""})
            .to_string(),
    ]));
    let h = harness(config(), backend.clone(), dir.path());

    let planner = Planner::from_config(&h.config, &h.registry, h.dispatcher.clone(), h.events.clone()).unwrap();
    let run = planner
        .run("Set up the todo database", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.stop, StopReason::Complete);
    assert_eq!(run.summary(), "Schema created and verified");
    assert_eq!(run.iterations[0].steps.len(), 2);
    assert!(run.iterations[0].steps.iter().all(|s| s.outcome.is_done()));
    assert_eq!(backend.calls(), 6);

    // The backend agent saw the file the db agent wrote
    let feedback = &backend.request(4).messages[2].content;
    assert!(feedback.contains("CREATE TABLE todos"));
}

#[tokio::test(start_paused = true)]
async fn e2e_planner_auto_mode_respects_limit() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.planner.auto_continue = true;
    cfg.planner.max_outer_iterations = 2;
    cfg.planner.cooldown_secs = 30;

    let round = |n: u32| {
        vec![
            serde_json::json!({"tasks": [{"role": "reviewer", "task_description": format!("round {n}")}]}).to_string(),
            done(&format!("reviewed round {n}")),
            serde_json::json!({"summary": format!("round {n} incomplete"), "status": "incomplete", "next_prompt": format!("goal {}", n + 1)})
                .to_string(),
        ]
    };
    let mut replies = round(1);
    replies.extend(round(2));
    let backend = Arc::new(ScriptedBackend::text(replies));
    let h = harness(cfg, backend.clone(), dir.path());

    let planner = Planner::from_config(&h.config, &h.registry, h.dispatcher.clone(), h.events.clone()).unwrap();
    let start = tokio::time::Instant::now();
    let run = planner.run("goal 1", &CancellationToken::new()).await.unwrap();

    assert_eq!(run.stop, StopReason::IterationLimit);
    assert_eq!(run.iterations.len(), 2);
    assert_eq!(run.iterations[1].goal, "goal 2");
    // one cooldown between the two rounds
    assert!(start.elapsed() >= Duration::from_secs(30));
}

// ── E2E: Configuration ───────────────────────────────────────────────────

#[test]
fn e2e_config_file_builds_registry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
default_backend = "anthropic"

[backends.anthropic]
api_key = "sk-ant-test"

[backends.local]
kind = "openai"
api_url = "http://localhost:9999/v1"
model = "qwen2.5-coder"

[roles.db]
backend = "local"
persona = "You are a database engineer."

[planner]
backend = "local"
auto_continue = true
"#,
    )
    .unwrap();

    let config = AppConfig::load_from(&path).unwrap();
    let registry = BackendRegistry::from_config(&config);

    assert_eq!(registry.list(), vec!["anthropic", "local"]);
    assert_eq!(registry.entry("anthropic").unwrap().kind, BackendKind::Anthropic);
    assert!(registry.entry("anthropic").unwrap().has_credential);
    assert_eq!(registry.get("local").unwrap().default_model(), "qwen2.5-coder");
    assert!(config.planner.auto_continue);
    // roles section replaces the defaults
    assert_eq!(config.roles.len(), 1);
}

#[tokio::test]
async fn e2e_role_on_unregistered_backend_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.roles.get_mut("frontend").unwrap().backend = Some("mystery".into());
    let backend = Arc::new(ScriptedBackend::text(vec![]));
    let h = harness(cfg, backend, dir.path());

    let err = h
        .dispatcher
        .dispatch(&Task::new("frontend", "t"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownBackend(_)));
}
