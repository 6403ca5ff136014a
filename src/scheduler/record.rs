//! Execution records and the run status taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one run attempt.
///
/// Serialized as `OK` / `FAIL` / `SKIPPED` / `EXCEPTION` / `UNKNOWN`, which is
/// also the text stored by the on-disk ledgers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// The body completed and reported success.
    Ok,
    /// The body completed and reported a non-exceptional failure.
    Fail,
    /// The task was not due; nothing ran.
    Skipped,
    /// The body returned an error or panicked.
    Exception,
    /// Reserved default.
    #[default]
    Unknown,
}

impl ExecutionStatus {
    /// Stable storage label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Fail => "FAIL",
            Self::Skipped => "SKIPPED",
            Self::Exception => "EXCEPTION",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse a storage label. Unrecognised labels map to [`Self::Unknown`].
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            "OK" => Self::Ok,
            "FAIL" => Self::Fail,
            "SKIPPED" => Self::Skipped,
            "EXCEPTION" => Self::Exception,
            _ => Self::Unknown,
        }
    }

    /// `true` for [`Self::Skipped`].
    #[must_use]
    pub fn is_skipped(self) -> bool {
        self == Self::Skipped
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger row: which task, when, and how it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Ledger key of the task.
    pub task_name: String,
    /// Time the attempt started (or the skip was decided).
    pub as_of: DateTime<Utc>,
    /// Outcome of the attempt.
    pub status: ExecutionStatus,
}

impl ExecutionRecord {
    /// Build a record.
    pub fn new(task_name: impl Into<String>, as_of: DateTime<Utc>, status: ExecutionStatus) -> Self {
        Self {
            task_name: task_name.into(),
            as_of,
            status,
        }
    }
}
