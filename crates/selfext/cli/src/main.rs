//! selfext - operator command line for the self-extension pipeline
//!
//! - Stage a candidate tool change (compile, sandbox-test, land)
//! - Evaluate the promotion gate and promote tested runs
//! - Pause and resume promotion
//! - Record health windows and trigger rollbacks
//! - Inspect the lifecycle ledger and operator status

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod setup;

use commands::{BranchNameArgs, HealthArgs, StageArgs};
use config::SelfExtConfig;

/// selfext CLI application
#[derive(Parser)]
#[command(name = "selfext")]
#[command(about = "Self-extension pipeline operator CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SELFEXT_CONFIG")]
    config: Option<String>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "SELFEXT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Stage a candidate change: branch, commit, compile, test, merge
    Stage(StageArgs),

    /// Evaluate the promotion gate against status contexts
    Gate {
        /// Reported status, as CONTEXT=STATE (repeatable)
        #[arg(short, long = "status", value_name = "CONTEXT=STATE")]
        statuses: Vec<String>,

        /// Required context (repeatable); configured or default set when omitted
        #[arg(short, long = "required", value_name = "CONTEXT")]
        required: Vec<String>,
    },

    /// Decide promotion for a tested run
    Promote {
        /// Run id returned by `stage`
        run_id: String,

        #[arg(short, long = "status", value_name = "CONTEXT=STATE")]
        statuses: Vec<String>,

        #[arg(short, long = "required", value_name = "CONTEXT")]
        required: Vec<String>,
    },

    /// Pause all promotions
    Pause {
        /// Why promotions are paused
        #[arg(short, long)]
        reason: String,

        /// Operator making the change
        #[arg(long)]
        by: Option<String>,
    },

    /// Resume promotions
    Resume {
        #[arg(long)]
        by: Option<String>,
    },

    /// Show pause state, latest event per run, and rollback progress
    Status {
        /// Maximum runs to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// List lifecycle events
    Ledger {
        /// Only events of this run, oldest first
        #[arg(long)]
        run: Option<String>,

        /// Maximum events to show (most recent first)
        #[arg(short, long, default_value_t = 50)]
        limit: usize,

        /// Verify the hash chain of the listed events
        #[arg(long)]
        verify: bool,
    },

    /// Record a health-window verdict for a promoted change
    Health(HealthArgs),

    /// Print the staging branch a change would use
    BranchName(BranchNameArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = SelfExtConfig::load(cli.config.as_deref())?;

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Commands::Stage(args) => commands::stage(&config, args).await,
        Commands::Gate { statuses, required } => commands::gate(&config, &statuses, required),
        Commands::Promote {
            run_id,
            statuses,
            required,
        } => commands::promote(&config, &run_id, &statuses, required).await,
        Commands::Pause { reason, by } => commands::pause(&config, &reason, by.as_deref()).await,
        Commands::Resume { by } => commands::resume(&config, by.as_deref()).await,
        Commands::Status { limit } => commands::status(&config, limit).await,
        Commands::Ledger { run, limit, verify } => {
            commands::ledger(&config, run.as_deref(), limit, verify).await
        }
        Commands::Health(args) => commands::health(&config, args).await,
        Commands::BranchName(args) => commands::branch_name(args),
    }
}
