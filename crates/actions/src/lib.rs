//! Built-in action handlers for Taskloom.
//!
//! The vocabulary is fixed: run a shell command, read a file, write a file.
//! Nothing here is sandboxed. The backend is trusted with arbitrary command
//! execution inside the configured working directory.

pub mod read_file;
pub mod run_command;
pub mod write_file;

use std::path::PathBuf;
use std::time::Duration;
use taskloom_config::AgentConfig;
use taskloom_core::action::ActionExecutor;

pub use read_file::ReadFileHandler;
pub use run_command::RunCommandHandler;
pub use write_file::WriteFileHandler;

/// Create an executor with all built-in handlers.
///
/// Actions run in `config.workdir`, or `fallback_workdir` when unset.
pub fn default_executor(config: &AgentConfig, fallback_workdir: PathBuf) -> ActionExecutor {
    let workdir = config.workdir.clone().unwrap_or(fallback_workdir);
    let mut executor = ActionExecutor::new(workdir).with_max_result_chars(config.max_result_chars);
    executor.register(Box::new(RunCommandHandler::new(Duration::from_secs(config.command_timeout_secs))));
    executor.register(Box::new(ReadFileHandler));
    executor.register(Box::new(WriteFileHandler));
    executor
}
