//! Task pool: owns the registered tasks and drives the tick loop.
//!
//! Each tick reads the clock once, runs every task in registration order and
//! appends the resulting records to the ledger in a single batch. The loop
//! runs on the calling thread ([`TaskPool::start`]) or on tokio's blocking
//! pool ([`TaskPool::spawn`]) and stops cooperatively through a [`StopHandle`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::PoolConfig;
use crate::error::{Result, SchedulerError};
use crate::scheduler::cadence::Cadence;
use crate::scheduler::clock::Clock;
use crate::scheduler::ledger::ExecutionLedger;
use crate::scheduler::record::ExecutionRecord;
use crate::scheduler::task::{Job, Task, TaskSnapshot};

/// What the pool does when a batch write to the ledger fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerFailurePolicy {
    /// Stop the loop and return the error from [`TaskPool::start`].
    #[default]
    Halt,
    /// Log every record of the failed batch and keep ticking.
    LogAndContinue,
}

/// Cloneable handle that asks a running pool to stop.
///
/// The request is observed at the top of the next loop iteration. A pool
/// sleeping between ticks is woken immediately.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl StopHandle {
    /// Request shutdown. Never blocks.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // A full channel already holds a pending wake-up.
        let _ = self.wake.try_send(());
    }

    /// Whether shutdown has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Registry of tasks plus the loop that runs them.
pub struct TaskPool {
    tasks: Vec<Task>,
    finalized: bool,
    ledger: Arc<dyn ExecutionLedger>,
    clock: Arc<dyn Clock>,
    config: PoolConfig,
    stop: StopHandle,
    wake_rx: Receiver<()>,
}

impl TaskPool {
    /// Empty, open pool.
    pub fn new(ledger: Arc<dyn ExecutionLedger>, clock: Arc<dyn Clock>, config: PoolConfig) -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            tasks: Vec::new(),
            finalized: false,
            ledger,
            clock,
            config,
            stop: StopHandle {
                stopped: Arc::new(AtomicBool::new(false)),
                wake: wake_tx,
            },
            wake_rx,
        }
    }

    /// Add a task built elsewhere.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::RegistrationClosed`] once the pool is finalized and
    /// [`SchedulerError::DuplicateTask`] if the name is already taken.
    pub fn register(&mut self, task: Task) -> Result<()> {
        if self.finalized {
            return Err(SchedulerError::RegistrationClosed(task.name().to_owned()));
        }
        if self.tasks.iter().any(|t| t.name() == task.name()) {
            return Err(SchedulerError::DuplicateTask(task.name().to_owned()));
        }
        info!(task = %task.name(), cadence = %task.cadence(), "task registered");
        self.tasks.push(task);
        Ok(())
    }

    /// Build a task for `job` against the pool's ledger and register it.
    ///
    /// The task uses the pool's configured failure policy.
    pub fn register_job<J: Job + 'static>(&mut self, job: J, cadence: Cadence) -> Result<()> {
        let task = Task::new(job, cadence, &self.ledger)?
            .with_failure_policy(self.config.failure_policy);
        self.register(task)
    }

    /// Lock the task set. Idempotent.
    pub fn finalize(&mut self) {
        if !self.finalized {
            debug!(tasks = self.tasks.len(), "task pool finalized");
        }
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Registered task names in registration order.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(Task::name).collect()
    }

    /// Handle for stopping the loop from another thread or task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Request shutdown of a running loop.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Run one tick and persist its records.
    ///
    /// Returns the records written to the ledger. `SKIPPED` records are left
    /// out unless `persist_skipped` is set, and an empty batch is not written.
    ///
    /// # Errors
    ///
    /// Returns the ledger error when the write fails under
    /// [`LedgerFailurePolicy::Halt`].
    pub fn tick(&mut self) -> Result<Vec<ExecutionRecord>> {
        let now = self.clock.now();
        let mut records: Vec<ExecutionRecord> =
            self.tasks.iter_mut().map(|task| task.run(false, now)).collect();

        let ran = records.iter().filter(|r| !r.status.is_skipped()).count();
        if !self.config.persist_skipped {
            records.retain(|r| !r.status.is_skipped());
        }
        debug!(
            now = %now,
            tasks = self.tasks.len(),
            ran,
            persisted = records.len(),
            "tick finished"
        );

        if self.persist(&records)? {
            Ok(records)
        } else {
            Ok(Vec::new())
        }
    }

    /// Run `name` now regardless of its cadence and persist the record.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownTask`] if no task has that name, or the ledger
    /// error under [`LedgerFailurePolicy::Halt`].
    pub fn force_run(&mut self, name: &str) -> Result<ExecutionRecord> {
        let now = self.clock.now();
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.name() == name)
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_owned()))?;
        let record = task.run(true, now);
        if self.config.persist_skipped || !record.status.is_skipped() {
            self.persist(std::slice::from_ref(&record))?;
        }
        Ok(record)
    }

    /// State of every task at the current clock time.
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        let now = self.clock.now();
        self.tasks.iter().map(|t| t.snapshot(now)).collect()
    }

    /// Finalize the pool and tick until stopped. Blocks the calling thread.
    ///
    /// # Errors
    ///
    /// Returns a ledger error under [`LedgerFailurePolicy::Halt`].
    pub fn start(&mut self) -> Result<()> {
        self.finalize();
        let interval = self.config.tick_interval();
        info!(
            tasks = self.tasks.len(),
            interval_secs = interval.as_secs(),
            "task pool started"
        );

        loop {
            if self.stop.is_stopped() {
                break;
            }
            self.tick()?;
            match self.wake_rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                // The pool owns a sender, so this cannot happen while it lives.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("task pool stopped");
        Ok(())
    }

    /// Run [`TaskPool::start`] on tokio's blocking thread pool.
    pub fn spawn(mut self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::task::spawn_blocking(move || self.start())
    }

    /// Write a batch. `Ok(false)` means the batch was dropped and logged.
    fn persist(&self, records: &[ExecutionRecord]) -> Result<bool> {
        if records.is_empty() {
            return Ok(true);
        }
        match self.ledger.append_execution_records(records) {
            Ok(()) => Ok(true),
            Err(e) => match self.config.ledger_failure {
                LedgerFailurePolicy::Halt => {
                    error!(records = records.len(), error = %e, "ledger write failed, halting");
                    Err(e)
                }
                LedgerFailurePolicy::LogAndContinue => {
                    for record in records {
                        error!(
                            task = %record.task_name,
                            as_of = %record.as_of,
                            status = %record.status,
                            error = %e,
                            "execution record dropped"
                        );
                    }
                    Ok(false)
                }
            },
        }
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("tasks", &self.tasks)
            .field("finalized", &self.finalized)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
