//! Taskloom CLI: the main entry point.
//!
//! Commands:
//! - `run`: Run one task for one role
//! - `plan`: Decompose a goal, dispatch the tasks, summarize
//! - `backends`: List configured backends
//! - `config`: Show, locate or validate the configuration
//! - `init`: Write a default config file

use std::path::PathBuf;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "taskloom",
    about = "Taskloom — plan, dispatch and run LLM agents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.taskloom/config.toml
    #[arg(long, global = true, env = "TASKLOOM_CONFIG")]
    config: Option<PathBuf>,

    /// Print engine events (backend calls, actions, iterations) to stderr
    #[arg(long, global = true)]
    events: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task with the agent for a role
    Run {
        /// Role to run the task as
        #[arg(short, long, default_value = "backend")]
        role: String,

        /// What the agent should do
        task: String,
    },

    /// Plan a goal across roles and run every task
    Plan {
        /// Keep iterating with the planner's next prompt until complete
        #[arg(long)]
        auto: bool,

        /// Upper bound on outer iterations in auto mode
        #[arg(long)]
        max_iterations: Option<u32>,

        /// The goal to work towards
        goal: String,
    },

    /// List configured backends
    Backends,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Write a default config file
    Init,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (credentials redacted)
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let opts = commands::GlobalOpts {
        config: cli.config,
        events: cli.events,
    };

    match cli.command {
        Commands::Run { role, task } => commands::run::run(&opts, &role, &task).await?,
        Commands::Plan {
            auto,
            max_iterations,
            goal,
        } => commands::plan::run(&opts, auto, max_iterations, &goal).await?,
        Commands::Backends => commands::backends::run(&opts).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_cmd::show(&opts).await?,
            ConfigAction::Path => commands::config_cmd::path(&opts).await?,
            ConfigAction::Validate => commands::config_cmd::validate(&opts).await?,
        },
        Commands::Init => commands::init::run(&opts).await?,
    }

    Ok(())
}
