//! Fixed-interval background tasks.
//!
//! Each task runs on its own interval. A tick is spawned separately from the
//! interval loop, so a slow tick never delays the clock; instead the next
//! tick finds the task still running and is skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Work run by the [`Scheduler`] on a fixed interval.
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    /// Name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Runs one pass. Errors are handled (logged) inside the task.
    async fn tick(&self);
}

/// What happened to a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    /// The previous tick was still running.
    Skipped,
}

/// A task with a reentrancy guard.
pub struct GuardedTask<T> {
    task: T,
    running: AtomicBool,
}

/// Clears the running flag even if the tick is cancelled or panics.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T: PeriodicTask> GuardedTask<T> {
    pub fn new(task: T) -> Self {
        Self {
            task,
            running: AtomicBool::new(false),
        }
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs one tick unless the previous one has not finished.
    pub async fn run_once(&self) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            metrics::counter!("scheduler_ticks_skipped_total", "task" => self.task.name())
                .increment(1);
            warn!(task = self.task.name(), "Previous tick still running, skipping");
            return TickOutcome::Skipped;
        }

        let _flag = RunningFlag(&self.running);
        self.task.tick().await;
        TickOutcome::Completed
    }
}

/// Runs [`PeriodicTask`]s until shutdown.
pub struct Scheduler {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// Starts running `task` every `every`, first tick one interval from now.
    pub fn spawn<T: PeriodicTask>(&self, task: T, every: Duration) -> Arc<GuardedTask<T>> {
        let guarded = Arc::new(GuardedTask::new(task));
        let runner = Arc::clone(&guarded);
        let tracker = self.tracker.clone();
        let shutdown = self.shutdown.clone();

        info!(task = guarded.task().name(), interval = ?every, "Scheduling periodic task");

        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let runner = Arc::clone(&runner);
                        tracker.spawn(async move {
                            runner.run_once().await;
                        });
                    }
                }
            }
            debug!(task = runner.task().name(), "Periodic task stopped");
        });

        guarded
    }

    /// Stops all interval loops and waits for in-flight ticks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
