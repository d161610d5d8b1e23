//! # Taskloom Core
//!
//! Domain types, traits, and error definitions for the Taskloom agent
//! execution engine. This crate has no HTTP and no process spawning: it
//! defines the model that the other crates implement against.
//!
//! ## Layout
//!
//! - [`backend`]: the `Backend` trait every LLM adapter satisfies
//! - [`action`]: the action vocabulary, handler trait, and executor
//! - [`message`]: the append-only conversation log
//! - [`task`]: tasks, outcomes, and plan steps
//! - [`event`]: the progress event bus

pub mod error;
pub mod message;
pub mod backend;
pub mod action;
pub mod task;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{ActionError, BackendError, Error, Result};
pub use message::{Conversation, ConversationId, Message, Role};
pub use backend::{Backend, BackendRequest, BackendResponse, Usage};
pub use action::{Action, ActionContext, ActionExecutor, ActionHandler, ActionKind, ActionResult};
pub use task::{AgentOutcome, PlanStep, Task};
pub use event::{DomainEvent, EventBus};
