//! In-process ledger. Nothing survives a restart.

use super::{ExecutionLedger, latest_success};
use crate::error::{Result, SchedulerError};
use crate::scheduler::record::ExecutionRecord;
use std::sync::Mutex;

/// `Vec`-backed ledger for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: Mutex<Vec<ExecutionRecord>>,
    append_calls: Mutex<usize>,
}

impl InMemoryLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-populated with `records`, e.g. to simulate a previous process.
    #[must_use]
    pub fn with_records(records: Vec<ExecutionRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            append_calls: Mutex::new(0),
        }
    }

    /// Copy of every stored record in append order.
    pub fn records(&self) -> Result<Vec<ExecutionRecord>> {
        Ok(self.lock_records()?.clone())
    }

    /// Number of batch writes received so far.
    pub fn append_calls(&self) -> Result<usize> {
        self.append_calls
            .lock()
            .map(|n| *n)
            .map_err(|e| SchedulerError::Ledger(format!("lock poisoned: {e}")))
    }

    fn lock_records(&self) -> Result<std::sync::MutexGuard<'_, Vec<ExecutionRecord>>> {
        self.records
            .lock()
            .map_err(|e| SchedulerError::Ledger(format!("lock poisoned: {e}")))
    }
}

impl ExecutionLedger for InMemoryLedger {
    fn last_successful_execution(&self, task_name: &str) -> Result<Option<ExecutionRecord>> {
        let records = self.lock_records()?;
        Ok(latest_success(records.iter(), task_name).cloned())
    }

    fn append_execution_records(&self, records: &[ExecutionRecord]) -> Result<()> {
        self.lock_records()?.extend_from_slice(records);
        let mut calls = self
            .append_calls
            .lock()
            .map_err(|e| SchedulerError::Ledger(format!("lock poisoned: {e}")))?;
        *calls += 1;
        Ok(())
    }
}
