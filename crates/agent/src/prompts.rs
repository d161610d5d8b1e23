//! Fixed prompt text for the agent loop and the planner.

use taskloom_core::task::PlanStep;

/// Sent after a reply that matched neither response shape.
pub const CLARIFICATION: &str = r#"Please provide a valid JSON response with either {"actions": [...]} or {"done": true, "summary": "..."}."#;

/// Describes the two legal response shapes to the backend.
pub const PROTOCOL_PREAMBLE: &str = r#"You complete tasks by requesting actions. Reply with exactly one JSON object in one of two shapes.

To act:
{"actions": [{"type": "<action>", "params": {...}}], "reasoning": "<why>"}

Available actions:
- run_command   {"command": "<shell command>"}  runs in the project directory
- read_file     {"path": "<path>"}
- write_file    {"path": "<path>", "content": "<full file content>"}
- delegate      {"role": "<role>", "task": "<description>"}  hands a sub-task to another role

Actions run in order. You will receive their results in the next message.

When the task is finished:
{"done": true, "summary": "<what was done>"}"#;

/// The first user message of an agent loop run.
pub fn task_message(persona: Option<&str>, description: &str) -> String {
    let mut out = String::new();
    if let Some(persona) = persona.map(str::trim).filter(|p| !p.is_empty()) {
        out.push_str(persona);
        out.push_str("\n\n");
    }
    out.push_str(PROTOCOL_PREAMBLE);
    out.push_str("\n\nTask: ");
    out.push_str(description);
    out
}

/// Ask the planner backend to split a goal into per-role tasks.
pub fn decomposition(goal: &str, roles: &[(&str, &str)]) -> String {
    let role_list: String = roles
        .iter()
        .map(|(name, persona)| {
            let blurb = persona.lines().next().unwrap_or_default().trim();
            if blurb.is_empty() {
                format!("- {name}")
            } else {
                format!("- {name}: {blurb}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a project planner. Break the goal below into concrete tasks, each assigned to one role.\n\n\
        Available roles:\n{role_list}\n\n\
        Goal: {goal}\n\n\
        Respond with only this JSON object:\n\
        {{\"tasks\": [{{\"agent\": \"<role>\", \"task_description\": \"<what to do>\"}}]}}\n\
        Order the tasks so that each one can build on the ones before it."
    )
}

/// Ask the planner backend to judge the outcomes against the goal.
pub fn summarization(goal: &str, steps: &[PlanStep]) -> String {
    let results: String = steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let status = if step.outcome.is_done() { "done" } else { "exhausted" };
            format!(
                "## {}. {} ({status})\nTask: {}\nResult: {}\n",
                i + 1,
                step.task.role(),
                step.task.description(),
                step.outcome.text()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are reviewing the work done towards a goal.\n\n\
        Goal: {goal}\n\n\
        Results:\n{results}\n\
        Decide whether the goal is fully met. Respond with only this JSON object:\n\
        {{\"summary\": \"<what was achieved>\", \"status\": \"complete\" | \"incomplete\", \"next_prompt\": \"<the goal for the next round, if incomplete>\"}}"
    )
}
