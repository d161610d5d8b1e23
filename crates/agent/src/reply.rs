//! Parsing assistant text into the reply protocol.
//!
//! The backend answers in free text that should contain one JSON object,
//! either `{"actions": [...]}` or `{"done": true, "summary": "..."}`.
//! Anything else is `Unrecognized` and the loop asks again.

use serde_json::Value;
use taskloom_core::action::Action;

/// What the backend asked for this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantReply {
    /// Run these actions in order, then report back.
    ActionBatch {
        actions: Vec<Action>,
        reasoning: Option<String>,
    },
    /// The task is finished.
    Completion { summary: String },
    /// Neither shape could be found.
    Unrecognized,
}

/// Classify one assistant reply.
///
/// `done` must be the boolean `true`; a missing summary is an empty string.
/// An empty `actions` array counts as unrecognized.
pub fn parse_reply(text: &str) -> AssistantReply {
    let Some(value) = extract_json_object(text) else {
        return AssistantReply::Unrecognized;
    };

    if value.get("done").and_then(Value::as_bool) == Some(true) {
        let summary = value
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return AssistantReply::Completion { summary };
    }

    match value.get("actions").and_then(Value::as_array) {
        Some(actions) if !actions.is_empty() => AssistantReply::ActionBatch {
            actions: actions.iter().map(Action::from_value).collect(),
            reasoning: value
                .get("reasoning")
                .and_then(Value::as_str)
                .map(String::from),
        },
        _ => AssistantReply::Unrecognized,
    }
}

/// Find a JSON object in assistant text.
///
/// Tries a ```` ```json ```` fence first, then the whole trimmed text, then
/// the span from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let candidate = fenced_json(text).unwrap_or_else(|| text.trim());

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn fenced_json(text: &str) -> Option<&str> {
    let start = text.find("```json")?;
    let after = &text[start + "```json".len()..];
    let end = after.find("```")?;
    Some(after[..end].trim())
}
