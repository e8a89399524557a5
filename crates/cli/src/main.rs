mod cli;
mod launcher;
mod report;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use kiln_core::KilnConfig;
use kiln_scheduler::{topological_order, ActionId, ProcessList, Scheduler};

use crate::cli::{Cli, Command, RunArgs};
use crate::launcher::ProcessLauncher;
use crate::report::Reporter;

#[tokio::main]
async fn main() -> Result<()> {
    kiln_core::config::load_dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(false)
        .init();

    let code = match cli.command {
        Command::Run(args) => run(args).await?,
        Command::Check { file } => check(&file)?,
    };
    std::process::exit(code);
}

/// Level used when RUST_LOG is unset.
const DEFAULT_LOG_LEVEL: &str = "warn";

/// `--verbose` forces debug; otherwise RUST_LOG, falling back to warn.
fn log_directive(verbose: bool, rust_log: Option<String>) -> String {
    if verbose {
        return "debug".to_string();
    }
    rust_log
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

fn log_filter(verbose: bool) -> tracing_subscriber::EnvFilter {
    let directive = log_directive(verbose, std::env::var("RUST_LOG").ok());
    tracing_subscriber::EnvFilter::try_new(&directive)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_LEVEL))
}

async fn run(args: RunArgs) -> Result<i32> {
    let mut config = match &args.config {
        Some(path) => KilnConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => KilnConfig::from_env().context("failed to load config from environment")?,
    };
    if let Some(max_local) = args.max_local {
        config.scheduler.max_local_processors = max_local;
    }
    if args.reuse {
        config.scheduler.enable_process_reuse = true;
    }
    config.validate()?;
    config.log_summary();

    let list = ProcessList::from_file(&args.file)
        .with_context(|| format!("failed to read process list {}", args.file.display()))?;
    let launcher = ProcessLauncher::new(Handle::current(), list.environment.clone());
    let scheduler = Arc::new(Scheduler::builder(launcher).config(config).build()?);

    let reporter = Arc::new(Reporter::new(list.len(), args.json));
    let sink = Arc::clone(&reporter);
    scheduler.set_process_finished_callback(move |record| sink.record(record));

    scheduler.enqueue_list(&list)?;
    scheduler.validate_graph()?;
    scheduler.start()?;
    info!(processes = list.len(), file = %args.file.display(), "build started");

    let waiter = Arc::clone(&scheduler);
    let wait = tokio::task::spawn_blocking(move || waiter.wait_idle(None));
    let completed = tokio::select! {
        done = wait => done.context("wait task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, waiting for running processes to exit");
            false
        }
    };

    let stopper = Arc::clone(&scheduler);
    tokio::task::spawn_blocking(move || stopper.stop())
        .await
        .context("stop task panicked")?;

    if let Some(fatal) = scheduler.fatal_error() {
        error!(error = %fatal, "scheduling aborted");
        return Ok(2);
    }
    let failures = reporter.failures();
    info!(
        finished = reporter.finished(),
        failed = failures.len(),
        "build finished"
    );
    if !completed {
        return Ok(130);
    }
    if !failures.is_empty() {
        eprintln!("{} process(es) failed: {}", failures.len(), failures.join(", "));
        return Ok(1);
    }
    Ok(0)
}

fn check(file: &Path) -> Result<i32> {
    let list = ProcessList::from_file(file)
        .with_context(|| format!("failed to read process list {}", file.display()))?;
    let dependencies: Vec<Vec<ActionId>> = list
        .processes
        .iter()
        .map(|entry| entry.dep.iter().copied().map(ActionId::new).collect())
        .collect();
    let order = topological_order(&dependencies)?;
    println!(
        "{}: {} processes, {} cache root(s), graph ok",
        file.display(),
        order.len(),
        list.cacheroots.len()
    );
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_defaults_to_warn() {
        assert_eq!(log_directive(false, None), "warn");
        assert_eq!(log_directive(false, Some("  ".into())), "warn");
    }

    #[test]
    fn rust_log_is_honored_unless_verbose() {
        assert_eq!(log_directive(false, Some("kiln_scheduler=trace".into())), "kiln_scheduler=trace");
        assert_eq!(log_directive(true, Some("error".into())), "debug");
    }
}
