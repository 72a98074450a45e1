use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = env!("GIT_VERSION");

#[derive(Parser)]
#[command(
    name = "brigade",
    version = VERSION,
    about = "Dispatches a plan of tasks to tiered workers, with escalation, verification, and review.",
    after_help = "\
EXIT CODES:
  0  all tasks complete
  1  unrecoverable error (load failure, lock timeout, decision-gate abort)
  2  run ended with tasks still incomplete (not fatal; resumable)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run (or resume) a plan to completion
    Run(RunArgs),

    /// Print current progress for a plan without running it
    Status {
        /// Path to the plan file
        plan: PathBuf,
    },

    /// Record a supervisor decision for a pending decision-needed event
    Decide(DecideArgs),
}

#[derive(Parser)]
pub struct RunArgs {
    /// Path to the plan file
    pub plan: PathBuf,

    /// Only run listed task ids
    #[arg(long, value_delimiter = ',')]
    pub only: Option<Vec<String>>,

    /// Skip listed task ids
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Start the window at this task id (inclusive) in topological order
    #[arg(long)]
    pub from: Option<String>,

    /// End the window at this task id (inclusive) in topological order
    #[arg(long)]
    pub until: Option<String>,

    /// Validate the plan and print what would run, without dispatching workers
    #[arg(long)]
    pub dry_run: bool,

    /// Break a stale state lock instead of failing
    #[arg(long)]
    pub force: bool,

    /// Override the plan's sidecar config max_parallel
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Append-only event log path
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Atomically-rewritten status snapshot path
    #[arg(long)]
    pub status: Option<PathBuf>,

    /// Supervisor command file path (polled for decisions in interactive mode)
    #[arg(long)]
    pub command_file: Option<PathBuf>,
}

#[derive(Parser)]
pub struct DecideArgs {
    /// Path to the supervisor command file a running brigade is polling
    pub command_file: PathBuf,

    /// The decision id named in the decision_needed event
    #[arg(long)]
    pub decision: String,

    /// retry | skip | abort | pause
    #[arg(long)]
    pub action: String,

    #[arg(long)]
    pub reason: Option<String>,

    #[arg(long)]
    pub guidance: Option<String>,
}
