//! Cadence: recurring task scheduler with catch-up semantics.
//!
//! Jobs are registered on a [`TaskPool`] with a [`Cadence`]: a fixed period
//! after the last success, a period on a fixed anchor grid, or a single run.
//! Every run is written to an [`ExecutionLedger`], and tasks read their last
//! success back from it at startup, so schedules survive restarts.
//!
//! # Architecture
//!
//! - **Cadence**: pure due-time arithmetic (`scheduler::cadence`)
//! - **Task**: a [`Job`] body plus its run state (`scheduler::task`)
//! - **Pool**: the tick loop and batch ledger writes (`scheduler::pool`)
//! - **Ledger**: in-memory, JSON Lines and SQLite backends (`scheduler::ledger`)

pub mod cadence_dirs;
pub mod config;
pub mod error;
pub mod scheduler;

pub use config::{LedgerBackend, LedgerConfig, LoggingConfig, PoolConfig, SchedulerConfig};
pub use error::{Result, SchedulerError};
pub use scheduler::{
    Cadence, Clock, ExecutionLedger, ExecutionRecord, ExecutionStatus, FailurePolicy, FnJob, Job,
    JobContext, LedgerFailurePolicy, ManualClock, StopHandle, SystemClock, Task, TaskPool,
    TaskSnapshot,
};
