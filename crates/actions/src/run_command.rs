//! `run_command`: execute a shell command in the working directory.
//!
//! A non-zero exit is not an error: the exit code and output come back as
//! data so the agent can react to the failure.

use std::time::Duration;
use async_trait::async_trait;
use taskloom_core::action::{Action, ActionContext, ActionHandler, ActionKind, ActionResult};
use taskloom_core::error::ActionError;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct RunCommandHandler {
    timeout: Duration,
}

impl RunCommandHandler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for RunCommandHandler {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

fn shell(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

#[async_trait]
impl ActionHandler for RunCommandHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::RunCommand
    }

    async fn execute(&self, action: &Action, ctx: &ActionContext) -> Result<ActionResult, ActionError> {
        let command = action.require("command")?;

        debug!(command = %command, workdir = %ctx.workdir.display(), "Executing shell command");

        let mut cmd = shell(&command);
        cmd.current_dir(&ctx.workdir).kill_on_drop(true);
        let child = cmd.output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ActionError::Io {
                    action: "run_command".into(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(command = %command, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(ActionError::Timeout {
                    action: "run_command".into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let success = output.status.success();

        let mut text = if stderr.trim().is_empty() {
            stdout.to_string()
        } else if stdout.trim().is_empty() {
            format!("[stderr]: {stderr}")
        } else {
            format!("{stdout}\n[stderr]: {stderr}")
        };

        if !success {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            text = format!("[exit code: {code}]\n{text}");
        }

        Ok(ActionResult {
            success,
            output: text.trim_end().to_string(),
        })
    }
}
