//! Scheduler host binary.
//!
//! Runs the built-in jobs against the configured execution ledger until
//! Ctrl+C, or prints their last successful runs with `status`.
//!
//! Usage: `cadence-host [--config <path>] [run|status|help]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cadence::scheduler::jobs::{BUILTIN_TASKS, register_builtins};
use cadence::scheduler::open_ledger;
use cadence::{ExecutionLedger, SchedulerConfig, SystemClock, TaskPool};
use tracing::info;
use tracing_subscriber::EnvFilter;

enum Command {
    Run,
    Status,
    Help,
}

struct Args {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config = None;
    let mut command = Command::Run;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args.next().context("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            "run" => command = Command::Run,
            "status" => command = Command::Status,
            "help" | "--help" | "-h" => command = Command::Help,
            other => anyhow::bail!("unknown argument `{other}` (use run|status|help)"),
        }
    }
    Ok(Args { config, command })
}

fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<SchedulerConfig> {
    match explicit {
        Some(path) => SchedulerConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => {
            let path = SchedulerConfig::default_config_path();
            if path.exists() {
                SchedulerConfig::from_file(&path)
                    .with_context(|| format!("loading config from {}", path.display()))
            } else {
                Ok(SchedulerConfig::default())
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    if matches!(args.command, Command::Help) {
        print_usage();
        return Ok(());
    }
    let config = load_config(args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .init();

    match args.command {
        Command::Run => run(config).await,
        Command::Status => status(&config),
        Command::Help => Ok(()),
    }
}

async fn run(config: SchedulerConfig) -> anyhow::Result<()> {
    let ledger = open_ledger(&config.ledger)?;
    let mut pool = TaskPool::new(Arc::clone(&ledger), Arc::new(SystemClock), config.pool.clone());
    register_builtins(&mut pool, ledger, cadence::cadence_dirs::bootstrap_marker_file())?;

    let stop = pool.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            stop.stop();
        }
    });

    info!(
        backend = ?config.ledger.backend,
        ledger = %config.ledger.resolved_path().display(),
        "cadence-host starting"
    );
    pool.spawn().await.context("scheduler thread panicked")??;
    info!("cadence-host shut down cleanly");
    Ok(())
}

fn status(config: &SchedulerConfig) -> anyhow::Result<()> {
    let ledger = open_ledger(&config.ledger)?;
    for name in BUILTIN_TASKS {
        match ledger.last_successful_execution(name)? {
            Some(record) => println!("{name}\t{}", record.as_of.to_rfc3339()),
            None => println!("{name}\tnever"),
        }
    }
    Ok(())
}

fn print_usage() {
    println!("cadence-host v{}", env!("CARGO_PKG_VERSION"));
    println!("usage: cadence-host [--config <path>] [run|status|help]");
    println!("  run     tick the built-in jobs until Ctrl+C (default)");
    println!("  status  print the last successful run of each built-in job");
}
