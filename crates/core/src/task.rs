//! Task and outcome types shared by the agent loop and the planner.

use serde::{Deserialize, Serialize};

/// A unit of work for one role. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    role: String,
    description: String,
}

impl Task {
    pub fn new(role: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            description: description.into(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// How an agent loop run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    /// The backend signalled completion.
    Done { summary: String },
    /// The iteration budget ran out first.
    Exhausted { last_content: String },
}

impl AgentOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, AgentOutcome::Done { .. })
    }

    /// The text a caller should show: the summary, or the last reply seen.
    pub fn text(&self) -> &str {
        match self {
            AgentOutcome::Done { summary } => summary,
            AgentOutcome::Exhausted { last_content } => last_content,
        }
    }
}

/// One dispatched task together with how it ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub task: Task,
    pub outcome: AgentOutcome,
}
