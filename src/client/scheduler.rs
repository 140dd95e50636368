//! Tick-based task scheduling for the connection state machine.
//!
//! The state machine only speaks in [`Ticks`]; the scheduler decides how
//! long a tick is.

use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A count of scheduler ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticks(pub u64);

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ticks", self.0)
    }
}

/// Body of a repeating task. Each returned future is awaited before the
/// next run, so runs never overlap.
pub type RepeatingTask = Box<dyn FnMut() -> BoxFuture<'static, ()> + Send>;

/// Handle to a scheduled task.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: AbortHandle,
}

impl ScheduledTask {
    pub fn new(handle: AbortHandle) -> Self {
        Self { handle }
    }

    /// Stop the task. Safe to call on a finished task.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Periodic and delayed execution.
pub trait Scheduler: Send + Sync + 'static {
    fn ticks_per_second(&self) -> f64;

    fn schedule_repeating(&self, every: Ticks, task: RepeatingTask) -> ScheduledTask;

    fn schedule_once(&self, after: Ticks, task: BoxFuture<'static, ()>) -> ScheduledTask;

    /// Round a wall-clock duration up to whole ticks.
    fn ticks_from(&self, duration: Duration) -> Ticks {
        Ticks((duration.as_secs_f64() * self.ticks_per_second()).ceil() as u64)
    }
}

/// [`Scheduler`] on the tokio runtime with a fixed tick length.
#[derive(Debug, Clone, Copy)]
pub struct TokioScheduler {
    tick: Duration,
}

impl TokioScheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    fn duration(&self, ticks: Ticks) -> Duration {
        self.tick.saturating_mul(u32::try_from(ticks.0).unwrap_or(u32::MAX))
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl Scheduler for TokioScheduler {
    fn ticks_per_second(&self) -> f64 {
        1.0 / self.tick.as_secs_f64()
    }

    fn schedule_repeating(&self, every: Ticks, mut task: RepeatingTask) -> ScheduledTask {
        let period = self.duration(every.max(Ticks(1)));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                task().await;
            }
        });
        ScheduledTask::new(handle.abort_handle())
    }

    fn schedule_once(&self, after: Ticks, task: BoxFuture<'static, ()>) -> ScheduledTask {
        let delay = self.duration(after);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        ScheduledTask::new(handle.abort_handle())
    }
}
