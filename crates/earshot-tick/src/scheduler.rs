//! Delayed and repeating tasks.
//!
//! The relay driver never sleeps inline: timeout guards and the
//! throughput window are handed to a [`TaskScheduler`] and the driver
//! keeps going. Guards are not cancelled when the state moves on; they
//! re-check the state when they fire and do nothing if it is stale.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Something that can run closures later.
pub trait TaskScheduler: Send + Sync + 'static {
    /// Runs `task` once after `delay`.
    fn run_later(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> TaskHandle;

    /// Runs `task` every `period`, first after one full period.
    fn run_repeating(&self, period: Duration, task: Box<dyn FnMut() + Send>) -> TaskHandle;
}

/// Handle to a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle {
    abort: AbortHandle,
}

impl TaskHandle {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }

    /// Stops the task. A one-shot task that already ran is unaffected.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// [`TaskScheduler`] backed by tokio timers.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Uses the runtime of the calling task.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime, like `tokio::spawn`.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl TaskScheduler for TokioScheduler {
    fn run_later(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> TaskHandle {
        let join = self.runtime.spawn(async move {
            time::sleep(delay).await;
            task();
        });
        TaskHandle::new(join.abort_handle())
    }

    fn run_repeating(&self, period: Duration, mut task: Box<dyn FnMut() + Send>) -> TaskHandle {
        let join = self.runtime.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                task();
            }
        });
        TaskHandle::new(join.abort_handle())
    }
}
