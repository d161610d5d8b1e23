//! Shared test helpers for agent, dispatcher and planner tests.

use std::sync::Mutex;
use taskloom_core::backend::{Backend, BackendRequest, BackendResponse, Usage};
use taskloom_core::error::BackendError;

/// A mock backend that returns a sequence of scripted replies.
///
/// Each call to `send` returns the next reply in the queue.
/// Panics if more calls are made than replies provided.
pub struct SequentialMockBackend {
    name: String,
    replies: Mutex<Vec<Result<String, BackendError>>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl SequentialMockBackend {
    pub fn new(replies: Vec<String>) -> Self {
        Self::scripted(replies.into_iter().map(Ok).collect())
    }

    pub fn scripted(replies: Vec<Result<String, BackendError>>) -> Self {
        Self {
            name: "mock".into(),
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.into();
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Backend for SequentialMockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn send(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let mut requests = self.requests.lock().unwrap();
        let replies = self.replies.lock().unwrap();
        let call = requests.len();

        if call >= replies.len() {
            panic!(
                "SequentialMockBackend: no more replies (call #{call}, have {})",
                replies.len()
            );
        }

        let model = request.model.clone();
        requests.push(request);
        replies[call].clone().map(|content| BackendResponse {
            content,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model,
        })
    }
}

/// `{"done": true, "summary": ...}`
pub fn done(summary: &str) -> String {
    serde_json::json!({"done": true, "summary": summary}).to_string()
}

/// `{"actions": [...]}` from `(type, params)` pairs.
pub fn actions(list: &[(&str, serde_json::Value)]) -> String {
    let actions: Vec<serde_json::Value> = list
        .iter()
        .map(|(kind, params)| serde_json::json!({"type": kind, "params": params}))
        .collect();
    serde_json::json!({"actions": actions}).to_string()
}
