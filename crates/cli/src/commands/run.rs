//! `taskloom run`: Run one task for one role.

use taskloom_core::task::{AgentOutcome, Task};
use super::{Engine, GlobalOpts, cancel_on_ctrl_c, spawn_event_printer};

/// Exit status when the iteration budget ran out before the agent finished.
pub const EXIT_EXHAUSTED: i32 = 2;

pub async fn run(opts: &GlobalOpts, role: &str, task: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = opts.load_config()?;
    let engine = Engine::build(config)?;
    if opts.events {
        spawn_event_printer(&engine.events);
    }

    let cancel = cancel_on_ctrl_c();
    let outcome = engine
        .dispatcher
        .dispatch(&Task::new(role, task), &cancel)
        .await?;

    match outcome {
        AgentOutcome::Done { summary } => {
            println!("{summary}");
            Ok(())
        }
        AgentOutcome::Exhausted { last_content } => {
            eprintln!(
                "  Iteration budget ({}) exhausted before {role} finished. Last reply:",
                engine.config.agent.max_iterations
            );
            println!("{last_content}");
            std::process::exit(EXIT_EXHAUSTED);
        }
    }
}
