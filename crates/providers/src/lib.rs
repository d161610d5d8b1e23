//! LLM backend implementations for Taskloom.
//!
//! All backends implement the `taskloom_core::Backend` trait. The registry
//! builds them from configuration; the retry policy wraps individual calls.

pub mod anthropic;
pub mod classify;
pub mod gemini;
pub mod openai_compat;
pub mod registry;
pub mod retry;

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use openai_compat::OpenAiCompatBackend;
pub use registry::{BackendKind, BackendRegistry, RegisteredBackend};
pub use retry::RetryPolicy;
