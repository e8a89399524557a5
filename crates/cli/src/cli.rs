use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Run a build graph described by a process list.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Schedules build processes across local slots")]
pub struct Cli {
    /// Log at debug level (overrides RUST_LOG).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute every process in the list, honoring dependencies.
    Run(RunArgs),
    /// Validate a process list and its dependency graph without running it.
    Check {
        /// Process list (YAML).
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Process list (YAML).
    pub file: PathBuf,

    /// Scheduler config file. Without one, defaults plus KILN_* env vars are used.
    #[arg(long, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Local weight budget (0 = logical processor count).
    #[arg(long)]
    pub max_local: Option<u32>,

    /// Hand exited worker processes the next job.
    #[arg(long)]
    pub reuse: bool,

    /// Print one JSON record per finished process instead of progress lines.
    #[arg(long)]
    pub json: bool,
}
