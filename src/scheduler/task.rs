//! Tasks: a job body bound to a cadence and its run history.
//!
//! A [`Task`] is built once at startup. Construction reads the last
//! successful run from the execution ledger, so a restarted process picks up
//! exactly where the previous one stopped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::scheduler::cadence::Cadence;
use crate::scheduler::ledger::ExecutionLedger;
use crate::scheduler::record::{ExecutionRecord, ExecutionStatus};

/// What a run hands to the job body.
#[derive(Debug, Clone, Copy)]
pub struct JobContext<'a> {
    /// Ledger name of the running task.
    pub task_name: &'a str,
    /// Attempt time.
    pub now: DateTime<Utc>,
    /// Previous successful run, if any. Backfills use this as their lower bound.
    pub last_success: Option<DateTime<Utc>>,
    /// `true` when the run bypassed the cadence check.
    pub forced: bool,
}

/// Body of a recurring task.
///
/// Return `Ok(status)` for an explicit outcome (usually [`ExecutionStatus::Ok`]
/// or [`ExecutionStatus::Fail`]). An `Err` or a panic is recorded as
/// [`ExecutionStatus::Exception`]; neither escapes the task.
pub trait Job: Send {
    /// Ledger key. Defaults to the implementing type's name without its module path.
    fn name(&self) -> String {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Do the work.
    fn run(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<ExecutionStatus>;
}

/// Closure-backed [`Job`] with an explicit name.
pub struct FnJob<F> {
    name: String,
    body: F,
}

impl<F> FnJob<F>
where
    F: FnMut(&JobContext<'_>) -> anyhow::Result<ExecutionStatus> + Send,
{
    /// Wrap `body` under `name`.
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

impl<F> Job for FnJob<F>
where
    F: FnMut(&JobContext<'_>) -> anyhow::Result<ExecutionStatus> + Send,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<ExecutionStatus> {
        (self.body)(ctx)
    }
}

/// How a finished attempt moves `last_success`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Every attempt advances `last_success`, whatever its status. A failing
    /// task waits for its next period instead of retrying every tick.
    #[default]
    AdvanceOnFailure,
    /// Only an `OK` attempt advances `last_success`; failures stay due.
    HoldOnFailure,
}

/// Point-in-time view of a task for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub name: String,
    pub cadence: Cadence,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub is_running: bool,
    /// See [`Cadence::next_due`].
    pub next_due: Option<DateTime<Utc>>,
}

/// A named job with a cadence and in-memory run state.
pub struct Task {
    name: String,
    cadence: Cadence,
    job: Box<dyn Job>,
    failure_policy: FailurePolicy,
    last_attempt: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    is_running: bool,
}

impl Task {
    /// Build a task, seeding its history from `ledger`.
    ///
    /// Both `last_attempt` and `last_success` start at the last `OK` record
    /// for the job's name.
    pub fn new<J, L>(job: J, cadence: Cadence, ledger: &L) -> Result<Self>
    where
        J: Job + 'static,
        L: ExecutionLedger + ?Sized,
    {
        Self::from_boxed(Box::new(job), cadence, ledger)
    }

    /// Same as [`Task::new`] for an already boxed job.
    pub fn from_boxed<L>(job: Box<dyn Job>, cadence: Cadence, ledger: &L) -> Result<Self>
    where
        L: ExecutionLedger + ?Sized,
    {
        let name = job.name();
        let last_success = ledger
            .last_successful_execution(&name)?
            .map(|record| record.as_of);
        match last_success {
            Some(at) => debug!(task = %name, last_success = %at, "task seeded from ledger"),
            None => debug!(task = %name, "task has no recorded success"),
        }
        Ok(Self {
            name,
            cadence,
            job,
            failure_policy: FailurePolicy::default(),
            last_attempt: last_success,
            last_success,
            is_running: false,
        })
    }

    /// Override how failures move `last_success`.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Whether the task is due at `now`. Always `false` while a run is in flight.
    #[must_use]
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        if self.is_running {
            return false;
        }
        self.cadence
            .is_due(self.last_attempt, self.last_success, now)
    }

    /// Run the task if due (or unconditionally with `force_run`).
    ///
    /// A task that is not due yields a `SKIPPED` record and is left untouched.
    pub fn run(&mut self, force_run: bool, now: DateTime<Utc>) -> ExecutionRecord {
        if self.is_running {
            warn!(task = %self.name, "run requested while already running, skipping");
            return ExecutionRecord::new(self.name.clone(), now, ExecutionStatus::Skipped);
        }
        if !force_run && !self.should_run(now) {
            return ExecutionRecord::new(self.name.clone(), now, ExecutionStatus::Skipped);
        }

        let started = Instant::now();
        let status = {
            let _running = RunningGuard::engage(&mut self.is_running);
            self.last_attempt = Some(now);
            let ctx = JobContext {
                task_name: &self.name,
                now,
                last_success: self.last_success,
                forced: force_run,
            };
            invoke_job(self.job.as_mut(), &ctx)
        };

        let advance = match self.failure_policy {
            FailurePolicy::AdvanceOnFailure => true,
            FailurePolicy::HoldOnFailure => status == ExecutionStatus::Ok,
        };
        if advance {
            self.last_success = Some(now);
        }

        info!(
            task = %self.name,
            status = %status,
            forced = force_run,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "task run finished"
        );
        ExecutionRecord::new(self.name.clone(), now, status)
    }

    /// Current state for status reporting.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> TaskSnapshot {
        TaskSnapshot {
            name: self.name.clone(),
            cadence: self.cadence,
            last_attempt: self.last_attempt,
            last_success: self.last_success,
            is_running: self.is_running,
            next_due: self
                .cadence
                .next_due(self.last_attempt, self.last_success, now),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("cadence", &self.cadence)
            .field("failure_policy", &self.failure_policy)
            .field("last_attempt", &self.last_attempt)
            .field("last_success", &self.last_success)
            .field("is_running", &self.is_running)
            .finish_non_exhaustive()
    }
}

/// Sets the running flag and clears it on every exit path, unwinding included.
struct RunningGuard<'a> {
    flag: &'a mut bool,
}

impl<'a> RunningGuard<'a> {
    fn engage(flag: &'a mut bool) -> Self {
        *flag = true;
        Self { flag }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        *self.flag = false;
    }
}

fn invoke_job(job: &mut dyn Job, ctx: &JobContext<'_>) -> ExecutionStatus {
    match catch_unwind(AssertUnwindSafe(|| job.run(ctx))) {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            let detail = format!("{e:#}");
            error!(task = %ctx.task_name, error = %detail, "task body failed");
            ExecutionStatus::Exception
        }
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            error!(task = %ctx.task_name, panic = %msg, "task body panicked");
            ExecutionStatus::Exception
        }
    }
}

/// `my_crate::jobs::Backfill<u8>` -> `Backfill`.
fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_owned()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::ledger::InMemoryLedger;
    use chrono::{TimeDelta, TimeZone};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(d: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, d, h, m, s).unwrap()
    }

    struct DedupeMessages;

    impl Job for DedupeMessages {
        fn run(&mut self, _ctx: &JobContext<'_>) -> anyhow::Result<ExecutionStatus> {
            Ok(ExecutionStatus::Ok)
        }
    }

    fn counting_job(
        name: &'static str,
        status: ExecutionStatus,
    ) -> (
        FnJob<impl FnMut(&JobContext<'_>) -> anyhow::Result<ExecutionStatus> + Send>,
        Arc<AtomicUsize>,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let job = FnJob::new(name, move |_ctx: &JobContext<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(status)
        });
        (job, calls)
    }

    fn daily_from_20th() -> Cadence {
        Cadence::anchored(at(20, 0, 0, 0), TimeDelta::days(1)).unwrap()
    }

    #[test]
    fn default_name_is_type_name() {
        assert_eq!(DedupeMessages.name(), "DedupeMessages");
        assert_eq!(short_type_name("a::b::Backfill<c::D>"), "Backfill");
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn construction_seeds_from_last_ok_record() {
        let ledger = InMemoryLedger::with_records(vec![
            ExecutionRecord::new("DedupeMessages", at(21, 0, 0, 0), ExecutionStatus::Ok),
            ExecutionRecord::new("DedupeMessages", at(22, 0, 0, 0), ExecutionStatus::Fail),
        ]);
        let task = Task::new(DedupeMessages, daily_from_20th(), &ledger).unwrap();
        assert_eq!(task.last_success(), Some(at(21, 0, 0, 0)));
        assert_eq!(task.last_attempt(), Some(at(21, 0, 0, 0)));
        assert!(!task.is_running());
    }

    #[test]
    fn before_anchor_task_is_not_due() {
        let ledger = InMemoryLedger::new();
        let task = Task::new(DedupeMessages, daily_from_20th(), &ledger).unwrap();
        assert!(!task.should_run(at(19, 12, 0, 0)));
    }

    #[test]
    fn skip_leaves_state_untouched() {
        let ledger = InMemoryLedger::with_records(vec![ExecutionRecord::new(
            "poll",
            at(20, 10, 0, 0),
            ExecutionStatus::Ok,
        )]);
        let (job, calls) = counting_job("poll", ExecutionStatus::Ok);
        let cadence = Cadence::periodic(TimeDelta::hours(1)).unwrap();
        let mut task = Task::new(job, cadence, &ledger).unwrap();

        let record = task.run(false, at(20, 10, 30, 0));
        assert_eq!(record.status, ExecutionStatus::Skipped);
        assert_eq!(record.task_name, "poll");
        assert_eq!(task.last_attempt(), Some(at(20, 10, 0, 0)));
        assert_eq!(task.last_success(), Some(at(20, 10, 0, 0)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn due_run_records_status_and_advances() {
        let ledger = InMemoryLedger::new();
        let (job, calls) = counting_job("poll", ExecutionStatus::Ok);
        let cadence = Cadence::periodic(TimeDelta::hours(1)).unwrap();
        let mut task = Task::new(job, cadence, &ledger).unwrap();

        let now = at(20, 10, 0, 0);
        let record = task.run(false, now);
        assert_eq!(record, ExecutionRecord::new("poll", now, ExecutionStatus::Ok));
        assert_eq!(task.last_attempt(), Some(now));
        assert_eq!(task.last_success(), Some(now));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!task.should_run(now + TimeDelta::minutes(59)));
        assert!(task.should_run(now + TimeDelta::hours(1)));
    }

    #[test]
    fn forced_run_ignores_cadence() {
        let ledger = InMemoryLedger::new();
        let (job, calls) = counting_job("once", ExecutionStatus::Ok);
        let mut task = Task::new(job, Cadence::one_off(), &ledger).unwrap();

        task.run(false, at(20, 0, 0, 0));
        assert!(!task.should_run(at(21, 0, 0, 0)));
        let record = task.run(true, at(21, 0, 0, 0));
        assert_eq!(record.status, ExecutionStatus::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn body_reported_failure_is_recorded() {
        let ledger = InMemoryLedger::new();
        let (job, _calls) = counting_job("flaky", ExecutionStatus::Fail);
        let mut task =
            Task::new(job, Cadence::periodic(TimeDelta::hours(1)).unwrap(), &ledger).unwrap();
        let now = at(20, 0, 0, 0);
        assert_eq!(task.run(false, now).status, ExecutionStatus::Fail);
        assert_eq!(task.last_success(), Some(now));
    }

    #[test]
    fn body_error_becomes_exception_and_still_advances() {
        let ledger = InMemoryLedger::new();
        let job = FnJob::new("broken", |_ctx: &JobContext<'_>| {
            Err(anyhow::anyhow!("upstream API returned 503"))
        });
        let mut task = Task::new(job, daily_from_20th(), &ledger).unwrap();

        let now = at(23, 4, 0, 0);
        let record = task.run(false, now);
        assert_eq!(record.status, ExecutionStatus::Exception);
        assert_eq!(task.last_success(), Some(now));
        assert!(!task.is_running());
        assert!(!task.should_run(now + TimeDelta::hours(1)));
    }

    #[test]
    fn panicking_body_is_contained() {
        let ledger = InMemoryLedger::new();
        let job = FnJob::new("panics", |_ctx: &JobContext<'_>| -> anyhow::Result<ExecutionStatus> {
            panic!("index out of bounds")
        });
        let mut task = Task::new(job, Cadence::one_off(), &ledger).unwrap();

        let record = task.run(false, at(20, 0, 0, 0));
        assert_eq!(record.status, ExecutionStatus::Exception);
        assert!(!task.is_running(), "running flag must be released after a panic");
    }

    #[test]
    fn hold_on_failure_keeps_task_due() {
        let ledger = InMemoryLedger::new();
        let job = FnJob::new("strict", |_ctx: &JobContext<'_>| Err(anyhow::anyhow!("boom")));
        let mut task = Task::new(job, daily_from_20th(), &ledger)
            .unwrap()
            .with_failure_policy(FailurePolicy::HoldOnFailure);

        let now = at(22, 1, 0, 0);
        assert_eq!(task.run(false, now).status, ExecutionStatus::Exception);
        assert_eq!(task.last_success(), None);
        assert_eq!(task.last_attempt(), Some(now));
        assert!(task.should_run(now + TimeDelta::seconds(5)));
    }

    #[test]
    fn running_flag_blocks_readiness_and_runs() {
        let ledger = InMemoryLedger::new();
        let (job, calls) = counting_job("guarded", ExecutionStatus::Ok);
        let mut task =
            Task::new(job, Cadence::periodic(TimeDelta::seconds(1)).unwrap(), &ledger).unwrap();

        task.is_running = true;
        let far_future = at(30, 0, 0, 0);
        assert!(!task.should_run(far_future));
        assert_eq!(task.run(false, far_future).status, ExecutionStatus::Skipped);
        assert_eq!(task.run(true, far_future).status, ExecutionStatus::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn body_sees_previous_success_in_context() {
        let seeded = at(20, 0, 0, 0);
        let ledger =
            InMemoryLedger::with_records(vec![ExecutionRecord::new("ctx", seeded, ExecutionStatus::Ok)]);
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&seen);
        let job = FnJob::new("ctx", move |ctx: &JobContext<'_>| {
            *sink.lock().unwrap() = Some((ctx.task_name.to_owned(), ctx.last_success, ctx.forced));
            Ok(ExecutionStatus::Ok)
        });
        let mut task =
            Task::new(job, Cadence::periodic(TimeDelta::hours(1)).unwrap(), &ledger).unwrap();

        task.run(false, at(21, 0, 0, 0));
        let observed = seen.lock().unwrap().clone().unwrap();
        assert_eq!(observed, ("ctx".to_owned(), Some(seeded), false));
    }

    #[test]
    fn snapshot_reports_next_due() {
        let ledger = InMemoryLedger::new();
        let mut task = Task::new(DedupeMessages, daily_from_20th(), &ledger).unwrap();
        let now = at(22, 6, 0, 0);
        task.run(false, now);

        let snap = task.snapshot(now);
        assert_eq!(snap.name, "DedupeMessages");
        assert_eq!(snap.last_success, Some(now));
        assert_eq!(snap.next_due, Some(at(23, 0, 0, 0)));
        assert!(!snap.is_running);
    }
}
