//! SQLite-backed execution ledger.
//!
//! A single `execution_records` table. Timestamps are stored as UTC
//! nanoseconds since the epoch so ordering is a plain integer comparison and
//! a reloaded `as_of` compares equal to the instant that was written.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::ExecutionLedger;
use crate::error::{Result, SchedulerError};
use crate::scheduler::record::{ExecutionRecord, ExecutionStatus};

/// Current ledger schema version, stamped into `schema_meta`.
pub(crate) const LEDGER_SCHEMA_VERSION: u32 = 1;

/// DDL for the ledger database. Idempotent.
const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS execution_records (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    task_name TEXT    NOT NULL,
    as_of_ns  INTEGER NOT NULL,
    status    TEXT    NOT NULL   -- OK / FAIL / SKIPPED / EXCEPTION / UNKNOWN
);

CREATE INDEX IF NOT EXISTS idx_records_task_status_time
    ON execution_records(task_name, status, as_of_ns);
"#;

/// SQLite execution ledger.
///
/// Thread-safe via an internal `Mutex<Connection>`.
pub struct SqliteLedger {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the database at `path`, creating parent directories
    /// and applying the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(sqlite_err)?;
        apply_schema(&conn).map_err(sqlite_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sqlite_err)?;
        apply_schema(&conn).map_err(sqlite_err)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema version recorded in the database.
    pub fn schema_version(&self) -> Result<Option<u32>> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM schema_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(sqlite_err)?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    /// Most recent `limit` records for `task_name`, newest first.
    pub fn history(&self, task_name: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT task_name, as_of_ns, status FROM execution_records \
                 WHERE task_name = ?1 ORDER BY as_of_ns DESC, id DESC LIMIT ?2",
            )
            .map_err(sqlite_err)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![task_name, limit], row_to_record)
            .map_err(sqlite_err)?;

        let mut records = Vec::new();
        for r in rows {
            records.push(r.map_err(sqlite_err)?);
        }
        Ok(records)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SchedulerError::Ledger(format!("lock poisoned: {e}")))
    }
}

impl ExecutionLedger for SqliteLedger {
    fn last_successful_execution(&self, task_name: &str) -> Result<Option<ExecutionRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT task_name, as_of_ns, status FROM execution_records \
             WHERE task_name = ?1 AND status = ?2 \
             ORDER BY as_of_ns DESC, id DESC LIMIT 1",
            params![task_name, ExecutionStatus::Ok.as_str()],
            row_to_record,
        )
        .optional()
        .map_err(sqlite_err)
    }

    fn append_execution_records(&self, records: &[ExecutionRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(sqlite_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO execution_records (task_name, as_of_ns, status) \
                     VALUES (?1, ?2, ?3)",
                )
                .map_err(sqlite_err)?;
            for record in records {
                let as_of_ns = record.as_of.timestamp_nanos_opt().ok_or_else(|| {
                    SchedulerError::Ledger(format!(
                        "timestamp {} for {} is outside the storable range",
                        record.as_of, record.task_name
                    ))
                })?;
                stmt.execute(params![record.task_name, as_of_ns, record.status.as_str()])
                    .map_err(sqlite_err)?;
            }
        }
        tx.commit().map_err(sqlite_err)
    }
}

fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        params![LEDGER_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let task_name: String = row.get(0)?;
    let as_of_ns: i64 = row.get(1)?;
    let status: String = row.get(2)?;
    let as_of = DateTime::<Utc>::from_timestamp_nanos(as_of_ns);
    Ok(ExecutionRecord {
        task_name,
        as_of,
        status: ExecutionStatus::from_label(&status),
    })
}

fn sqlite_err(e: rusqlite::Error) -> SchedulerError {
    SchedulerError::Ledger(format!("SQLite error: {e}"))
}
