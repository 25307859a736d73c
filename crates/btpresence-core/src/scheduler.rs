//! Scheduled callbacks and the self-rearming poll loop.
//!
//! The host only offers a single-shot primitive, [`Scheduler::schedule_at`].
//! [`PollLoop`] builds a repeating poll out of it: each run arms its own
//! successor at the invocation time plus the interval, after the run has
//! finished. A slow run therefore delays the next one instead of overlapping
//! it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, trace};
use utoipa::ToSchema;

/// Callback fired by a [`Scheduler`] with the time it fired at.
pub type Callback = Box<dyn FnOnce(DateTime<Utc>) -> BoxFuture<'static, ()> + Send>;

/// Single-shot deferred callback primitive.
pub trait Scheduler: Send + Sync {
    /// Fire `callback(now)` once, at or after `at`.
    fn schedule_at(&self, at: DateTime<Utc>, callback: Callback);
}

/// [`Scheduler`] that spawns a sleeping task on the tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    /// Schedule onto the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_at(&self, at: DateTime<Utc>, callback: Callback) {
        self.handle.spawn(async move {
            // A deadline already in the past fires right away.
            let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
            callback(Utc::now()).await;
        });
    }
}

/// [`Scheduler`] driven by hand, with simulated time.
///
/// Callbacks wait until [`ManualScheduler::fire_next`] runs the earliest one,
/// passing its scheduled time as "now".
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<BTreeMap<(DateTime<Utc>, u64), Callback>>,
    sequence: AtomicU64,
}

impl ManualScheduler {
    /// Scheduler with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callbacks waiting.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Time of the earliest waiting callback.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.lock().keys().next().map(|(at, _)| *at)
    }

    /// Run the earliest waiting callback. Returns the time it was due at.
    pub async fn fire_next(&self) -> Option<DateTime<Utc>> {
        let (at, callback) = {
            let mut pending = self.lock();
            let key = *pending.keys().next()?;
            let callback = pending.remove(&key)?;
            (key.0, callback)
        };
        callback(at).await;
        Some(at)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(DateTime<Utc>, u64), Callback>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_at(&self, at: DateTime<Utc>, callback: Callback) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.lock().insert((at, sequence), callback);
    }
}

/// Work run on every tick of a [`PollLoop`].
#[async_trait]
pub trait PollTask: Send + Sync {
    /// Run one cycle. `now` is the time the tick fired at.
    async fn poll(&self, now: DateTime<Utc>);
}

/// State of a [`PollLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    /// Waiting for the next tick.
    Idle,
    /// A cycle is executing.
    Running,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

/// Repeating poll built from single-shot callbacks.
pub struct PollLoop {
    task: Arc<dyn PollTask>,
    scheduler: Arc<dyn Scheduler>,
    interval: TimeDelta,
    state: AtomicU8,
    cycles: AtomicU64,
    stopped: AtomicBool,
}

impl PollLoop {
    /// Create a loop running `task` every `interval` on `scheduler`.
    #[must_use]
    pub fn new(task: Arc<dyn PollTask>, scheduler: Arc<dyn Scheduler>, interval: Duration) -> Arc<Self> {
        let interval = TimeDelta::from_std(interval).unwrap_or_else(|_| TimeDelta::days(1));
        Arc::new(Self {
            task,
            scheduler,
            interval,
            state: AtomicU8::new(IDLE),
            cycles: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    /// Arm the first tick at `at`.
    pub fn start(self: &Arc<Self>, at: DateTime<Utc>) {
        self.arm(at);
    }

    /// Stop re-arming. A cycle already running finishes normally.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether [`PollLoop::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Current state.
    pub fn state(&self) -> PollState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => PollState::Running,
            _ => PollState::Idle,
        }
    }

    /// Number of finished cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Interval between ticks.
    pub const fn interval(&self) -> TimeDelta {
        self.interval
    }

    fn arm(self: &Arc<Self>, at: DateTime<Utc>) {
        trace!(%at, "Arming next poll");
        let this = Arc::clone(self);
        self.scheduler
            .schedule_at(at, Box::new(move |now| this.run(now).boxed()));
    }

    async fn run(self: Arc<Self>, now: DateTime<Utc>) {
        if self.is_stopped() {
            debug!("Poll loop stopped");
            return;
        }

        self.state.store(RUNNING, Ordering::SeqCst);
        self.task.poll(now).await;
        self.cycles.fetch_add(1, Ordering::SeqCst);
        self.state.store(IDLE, Ordering::SeqCst);

        if self.is_stopped() {
            debug!("Poll loop stopped");
            return;
        }

        let next = now.checked_add_signed(self.interval).unwrap_or(now);
        self.arm(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    struct CountingTask {
        ticks: Mutex<Vec<DateTime<Utc>>>,
    }

    #[async_trait]
    impl PollTask for CountingTask {
        async fn poll(&self, now: DateTime<Utc>) {
            self.ticks.lock().unwrap().push(now);
        }
    }

    fn counting() -> Arc<CountingTask> {
        Arc::new(CountingTask {
            ticks: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_rearms_relative_to_invocation_time() {
        let scheduler = Arc::new(ManualScheduler::new());
        let task = counting();
        let poll = PollLoop::new(task.clone(), scheduler.clone(), Duration::from_secs(12));
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        poll.start(start);
        assert_eq!(scheduler.pending(), 1);

        for _ in 0..3 {
            scheduler.fire_next().await;
        }

        let ticks = task.ticks.lock().unwrap().clone();
        assert_eq!(
            ticks,
            vec![
                start,
                start + TimeDelta::seconds(12),
                start + TimeDelta::seconds(24)
            ]
        );
        assert_eq!(poll.cycles(), 3);
        assert_eq!(poll.state(), PollState::Idle);
        assert_eq!(scheduler.next_due(), Some(start + TimeDelta::seconds(36)));
    }

    #[tokio::test]
    async fn test_stop_prevents_rearm() {
        let scheduler = Arc::new(ManualScheduler::new());
        let poll = PollLoop::new(counting(), scheduler.clone(), Duration::from_secs(1));

        poll.start(Utc::now());
        poll.stop();
        scheduler.fire_next().await;

        assert_eq!(poll.cycles(), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_dropped_handle_keeps_loop_running() {
        let scheduler = Arc::new(ManualScheduler::new());
        let task = counting();
        let poll = PollLoop::new(task.clone(), scheduler.clone(), Duration::from_secs(1));
        poll.start(Utc::now());
        let observer = Arc::downgrade(&poll);
        drop(poll);

        scheduler.fire_next().await;
        scheduler.fire_next().await;

        assert_eq!(task.ticks.lock().unwrap().len(), 2);
        assert_eq!(scheduler.pending(), 1);

        let poll = observer.upgrade().expect("pending callback holds the loop");
        poll.stop();
        scheduler.fire_next().await;
        assert_eq!(task.ticks.lock().unwrap().len(), 2);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_manual_scheduler_fires_in_time_order() {
        let scheduler = ManualScheduler::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        for offset in [30, 10, 20] {
            let tx = tx.clone();
            scheduler.schedule_at(
                base + TimeDelta::seconds(offset),
                Box::new(move |_| {
                    async move {
                        let _ = tx.send(offset);
                    }
                    .boxed()
                }),
            );
        }
        while scheduler.fire_next().await.is_some() {}

        let mut order = Vec::new();
        while let Ok(offset) = rx.try_recv() {
            order.push(offset);
        }
        assert_eq!(order, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_fires_past_deadline_immediately() {
        let scheduler = TokioScheduler::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        scheduler.schedule_at(
            Utc::now() - TimeDelta::seconds(5),
            Box::new(move |now| {
                async move {
                    let _ = tx.send(now);
                }
                .boxed()
            }),
        );

        let fired = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("callback should fire")
            .unwrap();
        assert!(fired <= Utc::now());
    }
}
