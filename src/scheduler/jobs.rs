//! Built-in jobs registered by the host binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

use crate::error::Result;
use crate::scheduler::cadence::Cadence;
use crate::scheduler::ledger::ExecutionLedger;
use crate::scheduler::pool::TaskPool;
use crate::scheduler::record::ExecutionStatus;
use crate::scheduler::task::{Job, JobContext};

/// Ledger name of the liveness heartbeat.
pub const TASK_HEARTBEAT: &str = "heartbeat";

/// Ledger name of the daily ledger summary.
pub const TASK_LEDGER_SUMMARY: &str = "ledger_summary";

/// Ledger name of the one-off bootstrap marker.
pub const TASK_BOOTSTRAP_MARKER: &str = "bootstrap_marker";

/// Every built-in task name, in registration order.
pub const BUILTIN_TASKS: [&str; 3] = [TASK_HEARTBEAT, TASK_LEDGER_SUMMARY, TASK_BOOTSTRAP_MARKER];

/// Heartbeat period.
const HEARTBEAT_MINUTES: i64 = 5;

/// Logs that the scheduler is alive.
#[derive(Debug, Default)]
pub struct Heartbeat {
    beats: u64,
}

impl Job for Heartbeat {
    fn name(&self) -> String {
        TASK_HEARTBEAT.to_owned()
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<ExecutionStatus> {
        self.beats += 1;
        info!(beats = self.beats, previous = ?ctx.last_success, "heartbeat");
        Ok(ExecutionStatus::Ok)
    }
}

/// Logs the last successful run of each watched task.
///
/// A watched task with no success yet is reported, not treated as a failure:
/// on first boot the summary runs in the same tick as the tasks it watches,
/// before that tick's records reach the ledger.
pub struct LedgerSummary {
    ledger: Arc<dyn ExecutionLedger>,
    watched: Vec<String>,
}

impl LedgerSummary {
    pub fn new(ledger: Arc<dyn ExecutionLedger>, watched: Vec<String>) -> Self {
        Self { ledger, watched }
    }
}

impl Job for LedgerSummary {
    fn name(&self) -> String {
        TASK_LEDGER_SUMMARY.to_owned()
    }

    fn run(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<ExecutionStatus> {
        let mut missing = 0usize;
        for task in &self.watched {
            match self.ledger.last_successful_execution(task)? {
                Some(record) => info!(task = %task, last_success = %record.as_of, "ledger summary"),
                None => {
                    missing += 1;
                    info!(task = %task, "ledger summary: no recorded success yet");
                }
            }
        }
        info!(watched = self.watched.len(), missing, "ledger summary finished");
        Ok(ExecutionStatus::Ok)
    }
}

/// Writes a marker file with the time of the first successful start.
#[derive(Debug)]
pub struct BootstrapMarker {
    path: PathBuf,
}

impl BootstrapMarker {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Job for BootstrapMarker {
    fn name(&self) -> String {
        TASK_BOOTSTRAP_MARKER.to_owned()
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<ExecutionStatus> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&self.path, format!("{}\n", ctx.now.to_rfc3339()))
            .with_context(|| format!("writing {}", self.path.display()))?;
        info!(path = %self.path.display(), "bootstrap marker written");
        Ok(ExecutionStatus::Ok)
    }
}

/// Register the heartbeat, the daily ledger summary (midnight UTC) and the
/// bootstrap marker on `pool`.
pub fn register_builtins(
    pool: &mut TaskPool,
    ledger: Arc<dyn ExecutionLedger>,
    marker_path: PathBuf,
) -> Result<()> {
    pool.register_job(
        Heartbeat::default(),
        Cadence::periodic(TimeDelta::minutes(HEARTBEAT_MINUTES))?,
    )?;
    let watched = vec![TASK_HEARTBEAT.to_owned(), TASK_BOOTSTRAP_MARKER.to_owned()];
    pool.register_job(
        LedgerSummary::new(ledger, watched),
        Cadence::anchored(DateTime::<Utc>::UNIX_EPOCH, TimeDelta::days(1))?,
    )?;
    pool.register_job(BootstrapMarker::new(marker_path), Cadence::one_off())?;
    Ok(())
}
