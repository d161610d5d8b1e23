//! The agent execution engine.
//!
//! An [`AgentLoop`] runs one task for one role:
//!
//! 1. **Request** the next step from the backend with the full conversation
//! 2. **Parse** the reply into actions, a completion, or neither
//! 3. **Execute** actions in order and feed the results back, or ask the
//!    backend to answer in the expected format
//! 4. **Repeat** until the backend is done or the iteration budget runs out
//!
//! The [`Dispatcher`] picks the backend and persona for a role, and the
//! [`Planner`] fans a goal out into per-role tasks and decides whether to
//! go another round.

pub mod dispatcher;
pub mod loop_runner;
pub mod planner;
pub mod prompts;
pub mod reply;

#[cfg(test)]
mod test_helpers;

pub use dispatcher::Dispatcher;
pub use loop_runner::{AgentLoop, AgentRun, Delegator, RunContext};
pub use planner::{IterationRecord, IterationState, Planner, PlannerRun, StopReason};
pub use reply::{AssistantReply, parse_reply};
