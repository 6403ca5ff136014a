//! Append-only JSON Lines ledger file.

use super::{ExecutionLedger, latest_success};
use crate::error::{Result, SchedulerError};
use crate::scheduler::record::ExecutionRecord;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// File-backed ledger storing one [`ExecutionRecord`] per line.
///
/// Writes from this process are serialized by an internal mutex. Each batch is
/// encoded up front and written with a single `write_all`, so an encoding
/// failure never leaves a partial batch on disk.
pub struct JsonlLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLedger {
    /// Bind to `path`. The file is created on first append.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Every well-formed record in file order.
    pub fn read_all(&self) -> Result<Vec<ExecutionRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SchedulerError::Ledger(format!(
                    "failed to read ledger {}: {e}",
                    self.path.display()
                )));
            }
        };

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<ExecutionRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        "ignoring malformed ledger line {} in {}: {e}",
                        line_no + 1,
                        self.path.display()
                    );
                }
            }
        }
        Ok(records)
    }
}

impl ExecutionLedger for JsonlLedger {
    fn last_successful_execution(&self, task_name: &str) -> Result<Option<ExecutionRecord>> {
        let records = self.read_all()?;
        Ok(latest_success(records.iter(), task_name).cloned())
    }

    fn append_execution_records(&self, records: &[ExecutionRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut batch = String::new();
        for record in records {
            let json = serde_json::to_string(record).map_err(|e| {
                SchedulerError::Ledger(format!("failed to encode execution record: {e}"))
            })?;
            batch.push_str(&json);
            batch.push('\n');
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| SchedulerError::Ledger(format!("lock poisoned: {e}")))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SchedulerError::Ledger(format!("failed to create ledger directory: {e}"))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SchedulerError::Ledger(format!("failed to open ledger: {e}")))?;

        file.write_all(batch.as_bytes())
            .map_err(|e| SchedulerError::Ledger(format!("failed to append records: {e}")))?;
        file.sync_data()
            .map_err(|e| SchedulerError::Ledger(format!("failed to sync ledger: {e}")))?;
        Ok(())
    }
}
