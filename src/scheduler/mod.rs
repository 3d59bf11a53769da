//! Cron scheduling
//!
//! A single tick loop owns the trigger table. When an entry comes due its job is spawned
//! on a [`TaskTracker`], so a slow or failing job never holds up the loop or any other
//! entry. [`Scheduler::stop`] cancels the loop and waits for every spawned job to return.

mod cron;

pub use cron::CronSchedule;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::clock::{Clock, SystemClock};

/// Longest the tick loop sleeps without re-reading the table
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Errors raised when registering jobs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    /// Wrong number of whitespace-separated fields
    #[error(
        "invalid cron expression {expression:?}: expected 6 fields \
         (second minute hour day-of-month month day-of-week), found {found}"
    )]
    FieldCount {
        /// The rejected expression
        expression: String,
        /// Number of fields present
        found: usize,
    },

    /// One field could not be parsed
    #[error("invalid {field} field {value:?}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Raw field text
        value: String,
        /// What is wrong with it
        reason: String,
    },

    /// The scheduler has been stopped and accepts no more jobs
    #[error("scheduler is stopped")]
    Stopped,
}

/// Future returned by a job invocation
pub type JobFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A schedulable job; receives a token that is cancelled when the scheduler stops
pub type JobFn = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;

/// Handle of a registered job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(usize);

struct Entry {
    id: JobId,
    name: String,
    schedule: CronSchedule,
    next: Option<DateTime<Utc>>,
    job: JobFn,
}

struct Inner {
    entries: Mutex<Vec<Entry>>,
    clock: Arc<dyn Clock>,
    changed: Notify,
    cancel: CancellationToken,
    tracker: TaskTracker,
    next_id: AtomicUsize,
    stopped: AtomicBool,
}

/// Cron scheduler with graceful drain
pub struct Scheduler {
    inner: Arc<Inner>,
    tick_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Scheduler driven by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Scheduler reading "now" from `clock`; sleeping always uses the tokio timer
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Vec::new()),
                clock,
                changed: Notify::new(),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                next_id: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
            }),
            tick_loop: Mutex::new(None),
        }
    }

    /// Register `job` to run whenever `expression` matches.
    ///
    /// Nothing is registered when the expression is rejected.
    pub fn add_job<F>(
        &self,
        name: impl Into<String>,
        expression: &str,
        job: F,
    ) -> Result<JobId, ScheduleError>
    where
        F: Fn(CancellationToken) -> JobFuture + Send + Sync + 'static,
    {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(ScheduleError::Stopped);
        }

        let schedule = CronSchedule::parse(expression)?;
        let name = name.into();
        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let next = schedule.next_after(self.inner.clock.now());
        match next {
            Some(at) => info!(job = %name, schedule = %schedule, next_run = %at, "Registered job"),
            None => warn!(job = %name, schedule = %schedule, "Registered job never fires"),
        }

        self.inner.entries.lock().push(Entry {
            id,
            name,
            schedule,
            next,
            job: Arc::new(job),
        });
        self.inner.changed.notify_one();
        Ok(id)
    }

    /// Number of registered jobs
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether no job is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next firing time of a registered job
    pub fn next_run(&self, id: JobId) -> Option<DateTime<Utc>> {
        self.inner
            .entries
            .lock()
            .iter()
            .find(|entry| entry.id == id)
            .and_then(|entry| entry.next)
    }

    /// Start the tick loop. Calling it again while running has no effect.
    pub fn start(&self) {
        let mut tick_loop = self.tick_loop.lock();
        if tick_loop.is_some() || self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }

        info!(jobs = self.len(), "Scheduler started");
        let inner = Arc::clone(&self.inner);
        *tick_loop = Some(tokio::spawn(run_loop(inner)));
    }

    /// Stop firing and wait until every in-flight job has finished.
    ///
    /// Running jobs see their cancellation token fire and are expected to wind down.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.cancel.cancel();

        let handle = self.tick_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler loop panicked");
            }
        }

        self.inner.tracker.close();
        let in_flight = self.inner.tracker.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for running jobs to finish");
        }
        self.inner.tracker.wait().await;
        info!("Scheduler stopped");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_loop(inner: Arc<Inner>) {
    loop {
        let now = inner.clock.now();
        let wait = inner
            .entries
            .lock()
            .iter()
            .filter_map(|entry| entry.next)
            .min()
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(MAX_IDLE)
            .min(MAX_IDLE);

        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = inner.changed.notified() => continue,
            _ = tokio::time::sleep(wait) => {}
        }

        fire_due(&inner);
    }
    debug!("Scheduler loop exited");
}

fn fire_due(inner: &Inner) {
    let now = inner.clock.now();
    let mut due = Vec::new();
    {
        let mut entries = inner.entries.lock();
        for entry in entries.iter_mut() {
            if entry.next.is_some_and(|next| next <= now) {
                due.push((entry.name.clone(), Arc::clone(&entry.job)));
                entry.next = entry.schedule.next_after(now);
            }
        }
    }

    for (name, job) in due {
        let cancel = inner.cancel.child_token();
        let span = info_span!("job", job = %name);
        inner.tracker.spawn(
            async move {
                debug!("Job fired");
                if let Err(e) = job(cancel).await {
                    error!(error = %e, "Job failed");
                }
            }
            .instrument(span),
        );
    }
}
