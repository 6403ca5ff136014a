//! Execution ledger: durable history of task runs.
//!
//! The scheduler needs two things from storage: the last successful run of a
//! task (read once when the task is built) and a batch append of the records
//! produced by a tick. [`ExecutionLedger`] is that seam; the adapters below
//! are the backends the host binary can pick from config.

mod jsonl;
mod memory;
mod sqlite;

pub use jsonl::JsonlLedger;
pub use memory::InMemoryLedger;
pub use sqlite::SqliteLedger;

use crate::config::{LedgerBackend, LedgerConfig};
use crate::error::Result;
use crate::scheduler::record::ExecutionRecord;
use std::sync::Arc;

/// Persistence collaborator consumed by tasks and the task pool.
pub trait ExecutionLedger: Send + Sync {
    /// Most recent record with status `OK` for `task_name`, if any.
    fn last_successful_execution(&self, task_name: &str) -> Result<Option<ExecutionRecord>>;

    /// Append `records` as one write.
    fn append_execution_records(&self, records: &[ExecutionRecord]) -> Result<()>;
}

impl<L: ExecutionLedger + ?Sized> ExecutionLedger for Arc<L> {
    fn last_successful_execution(&self, task_name: &str) -> Result<Option<ExecutionRecord>> {
        (**self).last_successful_execution(task_name)
    }

    fn append_execution_records(&self, records: &[ExecutionRecord]) -> Result<()> {
        (**self).append_execution_records(records)
    }
}

/// Open the ledger backend selected by `config`.
pub fn open_ledger(config: &LedgerConfig) -> Result<Arc<dyn ExecutionLedger>> {
    let ledger: Arc<dyn ExecutionLedger> = match config.backend {
        LedgerBackend::Memory => Arc::new(InMemoryLedger::new()),
        LedgerBackend::Jsonl => Arc::new(JsonlLedger::new(config.resolved_path())),
        LedgerBackend::Sqlite => Arc::new(SqliteLedger::open(&config.resolved_path())?),
    };
    tracing::debug!(backend = ?config.backend, "execution ledger opened");
    Ok(ledger)
}

/// Latest OK record in `records` for `task_name`; later entries win ties.
pub(crate) fn latest_success<'a>(
    records: impl IntoIterator<Item = &'a ExecutionRecord>,
    task_name: &str,
) -> Option<&'a ExecutionRecord> {
    records
        .into_iter()
        .filter(|r| r.task_name == task_name && r.status == crate::ExecutionStatus::Ok)
        .fold(None, |best: Option<&ExecutionRecord>, r| match best {
            Some(b) if b.as_of > r.as_of => Some(b),
            _ => Some(r),
        })
}
