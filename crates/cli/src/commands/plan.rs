//! `taskloom plan`: Decompose a goal across roles and run every task.

use taskloom_agent::{Planner, StopReason};
use super::{Engine, GlobalOpts, cancel_on_ctrl_c, spawn_event_printer};

pub async fn run(
    opts: &GlobalOpts,
    auto: bool,
    max_iterations: Option<u32>,
    goal: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = opts.load_config()?;
    if auto {
        config.planner.auto_continue = true;
    }
    if let Some(max) = max_iterations {
        config.planner.max_outer_iterations = max;
    }

    let engine = Engine::build(config)?;
    if opts.events {
        spawn_event_printer(&engine.events);
    }

    let planner = Planner::from_config(
        &engine.config,
        &engine.registry,
        engine.dispatcher.clone(),
        engine.events.clone(),
    )?;

    let cancel = cancel_on_ctrl_c();
    let run = planner.run(goal, &cancel).await?;

    for record in &run.iterations {
        println!();
        println!("── Iteration {} ──", record.iteration);
        println!("Goal: {}", record.goal);
        for step in &record.steps {
            let status = if step.outcome.is_done() { "done" } else { "exhausted" };
            println!("  [{}] {} ({status})", step.task.role(), step.task.description());
        }
        println!();
        println!("{}", record.summary);
    }

    println!();
    match run.stop {
        StopReason::Complete => println!("Goal complete."),
        StopReason::SingleShot => println!("Stopped after one iteration (use --auto to keep going)."),
        StopReason::IterationLimit => println!(
            "Stopped at the iteration limit ({}) without completing the goal.",
            engine.config.planner.max_outer_iterations
        ),
    }

    Ok(())
}
