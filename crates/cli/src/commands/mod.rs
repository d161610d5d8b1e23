//! Subcommands and the engine wiring they share.

pub mod backends;
pub mod config_cmd;
pub mod init;
pub mod plan;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;
use taskloom_agent::Dispatcher;
use taskloom_config::AppConfig;
use taskloom_core::event::{DomainEvent, EventBus};
use taskloom_providers::BackendRegistry;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Flags accepted by every subcommand.
pub struct GlobalOpts {
    pub config: Option<PathBuf>,
    pub events: bool,
}

impl GlobalOpts {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
    }

    /// Load the config file, then apply environment overrides.
    pub fn load_config(&self) -> Result<AppConfig, Box<dyn std::error::Error>> {
        let path = self.config_path();
        AppConfig::load_with_env(&path).map_err(|e| format!("Failed to load config: {e}").into())
    }
}

/// Everything a run needs, built once from configuration.
pub struct Engine {
    pub config: AppConfig,
    pub registry: Arc<BackendRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub events: Arc<EventBus>,
}

impl Engine {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let workdir = std::env::current_dir()?;
        let events = Arc::new(EventBus::default());
        let registry = Arc::new(BackendRegistry::from_config(&config));
        let executor = Arc::new(taskloom_actions::default_executor(&config.agent, workdir));

        info!(
            workdir = %executor.workdir().display(),
            backends = ?registry.list(),
            "Engine ready"
        );

        let dispatcher = Arc::new(Dispatcher::from_config(
            &config,
            registry.clone(),
            executor,
            events.clone(),
        ));

        Ok(Self {
            config,
            registry,
            dispatcher,
            events,
        })
    }
}

/// A token that is cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the current run");
            child.cancel();
        }
    });
    token
}

/// Print every domain event to stderr until the bus closes.
pub fn spawn_event_printer(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => eprintln!("  · {}", describe_event(&event)),
                Err(RecvError::Lagged(skipped)) => eprintln!("  · ({skipped} events skipped)"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// One-line rendering of an event for the progress feed.
pub fn describe_event(event: &DomainEvent) -> String {
    match event {
        DomainEvent::BackendResponded { backend, model, tokens_used, .. } => {
            format!("{backend}/{model} responded ({tokens_used} tokens)")
        }
        DomainEvent::BackendRetry { backend, attempt, delay_ms, .. } => {
            format!("{backend} rate limited, retry {attempt} in {delay_ms}ms")
        }
        DomainEvent::ActionExecuted { role, action, success, duration_ms, .. } => {
            let status = if *success { "ok" } else { "failed" };
            format!("[{role}] {action} {status} ({duration_ms}ms)")
        }
        DomainEvent::AgentFinished { role, done, iterations, .. } => {
            let status = if *done { "done" } else { "exhausted" };
            format!("[{role}] {status} after {iterations} iterations")
        }
        DomainEvent::PlannerIteration { iteration, tasks, complete, .. } => {
            let status = if *complete { "complete" } else { "incomplete" };
            format!("planner iteration {iteration}: {tasks} tasks, {status}")
        }
    }
}
