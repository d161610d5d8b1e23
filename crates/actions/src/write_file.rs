//! `write_file`: create or overwrite a file, creating parent directories.

use async_trait::async_trait;
use taskloom_core::action::{Action, ActionContext, ActionHandler, ActionKind, ActionResult};
use taskloom_core::error::ActionError;
use tracing::debug;

pub struct WriteFileHandler;

#[async_trait]
impl ActionHandler for WriteFileHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::WriteFile
    }

    async fn execute(&self, action: &Action, ctx: &ActionContext) -> Result<ActionResult, ActionError> {
        let path = action.require("path")?;
        let content = action.require("content")?;
        let resolved = ctx.resolve(&path);

        if let Some(parent) = resolved.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(ActionResult::failed(format!("Failed to create directory for {path}: {e}")));
        }

        debug!(path = %resolved.display(), bytes = content.len(), "Writing file");

        match tokio::fs::write(&resolved, &content).await {
            Ok(()) => Ok(ActionResult::ok(format!("Wrote {} bytes to {path}", content.len()))),
            Err(e) => Ok(ActionResult::failed(format!("Failed to write {path}: {e}"))),
        }
    }
}
