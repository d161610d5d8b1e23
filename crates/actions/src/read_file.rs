//! `read_file`: return a file's contents as text.

use async_trait::async_trait;
use taskloom_core::action::{Action, ActionContext, ActionHandler, ActionKind, ActionResult};
use taskloom_core::error::ActionError;

pub struct ReadFileHandler;

#[async_trait]
impl ActionHandler for ReadFileHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ReadFile
    }

    async fn execute(&self, action: &Action, ctx: &ActionContext) -> Result<ActionResult, ActionError> {
        let path = action.require("path")?;
        let resolved = ctx.resolve(&path);

        // A missing file is reported to the agent, not raised
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => Ok(ActionResult::ok(content)),
            Err(e) => Ok(ActionResult::failed(format!("Failed to read {path}: {e}"))),
        }
    }
}
