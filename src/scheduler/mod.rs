//! Recurring task scheduler.
//!
//! A [`TaskPool`] owns a fixed set of [`Task`]s. On every tick it asks each
//! task whether it is due under its [`Cadence`], runs the due ones and writes
//! one [`ExecutionRecord`] per run to the [`ExecutionLedger`]. Tasks seed
//! their history from the ledger when built, so a restarted process neither
//! repeats work nor replays every missed period: after downtime an anchored
//! task runs once for the latest missed slot.

pub mod cadence;
pub mod clock;
pub mod jobs;
pub mod ledger;
pub mod pool;
pub mod record;
pub mod task;

pub use cadence::{Cadence, last_expected_run};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{ExecutionLedger, InMemoryLedger, JsonlLedger, SqliteLedger, open_ledger};
pub use pool::{LedgerFailurePolicy, StopHandle, TaskPool};
pub use record::{ExecutionRecord, ExecutionStatus};
pub use task::{FailurePolicy, FnJob, Job, JobContext, Task, TaskSnapshot};
