//! Poll cadence driver.
//!
//! Invokes a [`PollTask`] repeatedly at a configurable interval, measured from the start of one
//! invocation to the start of the next (`max(0, interval - elapsed)` between end and start).
//!
//! Each call to [`SamplingScheduler::start`] or [`SamplingScheduler::set_interval`] opens a new
//! generation with a monotonic [`GenerationId`]. The previous generation is superseded: an
//! invocation it already started runs to completion (its result is still delivered by the task),
//! but it never schedules another one. All generations share a single in-flight permit, so the
//! new generation starts as soon as that permit is released and invocations never overlap.

use async_trait::async_trait;
use derive_more::Display;
use parking_lot::Mutex;
use std::{fmt::Display as FmtDisplay, sync::Arc, time::Duration};
use tokio::{
    sync::{Semaphore, watch},
    time::Instant,
};
use tracing::{debug, info, warn};

/// Unit of work invoked on every tick, typically "fetch one snapshot and apply it".
///
/// Retry and backoff belong to the task; the scheduler logs failures and keeps its cadence.
#[async_trait]
pub trait PollTask: Send + Sync + 'static {
    type Error: FmtDisplay + Send;

    async fn poll(&self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Display)]
#[display("gen-{_0}")]
pub struct GenerationId(u64);

impl GenerationId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum GenerationState {
    /// Created, waiting for the in-flight permit
    #[default]
    Idle,
    /// Invocation outstanding
    Running,
    /// Waiting for the next tick
    Scheduled,
    /// Replaced by a newer generation
    Superseded,
    /// Scheduler stopped
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Idle,
    Active(GenerationId),
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct Status {
    generation: GenerationId,
    state: GenerationState,
}

#[derive(Debug)]
pub struct SamplingScheduler<T> {
    task: Arc<T>,
    control: watch::Sender<Control>,
    in_flight: Arc<Semaphore>,
    status: Arc<Mutex<Status>>,
    interval: Option<Duration>,
}

impl<T> SamplingScheduler<T>
where
    T: PollTask,
{
    pub fn new(task: T) -> Self {
        Self::with_shared(Arc::new(task))
    }

    pub fn with_shared(task: Arc<T>) -> Self {
        let (control, _) = watch::channel(Control::Idle);
        Self {
            task,
            control,
            in_flight: Arc::new(Semaphore::new(1)),
            status: Arc::new(Mutex::new(Status {
                generation: GenerationId::default(),
                state: GenerationState::Idle,
            })),
            interval: None,
        }
    }

    /// Start polling at `interval`. Must be called within a Tokio runtime.
    pub fn start(&mut self, interval: Duration) -> GenerationId {
        self.set_interval(interval)
    }

    /// Supersede the active generation (if any) with one polling at `interval`.
    pub fn set_interval(&mut self, interval: Duration) -> GenerationId {
        let generation = {
            let mut status = self.status.lock();
            status.generation = GenerationId(status.generation.0 + 1);
            status.state = GenerationState::Idle;
            status.generation
        };

        self.interval = Some(interval);
        self.control.send_replace(Control::Active(generation));

        info!(
            %generation,
            interval_ms = interval.as_millis() as u64,
            "starting sampling generation"
        );

        tokio::spawn(run_generation(
            generation,
            interval,
            Arc::clone(&self.task),
            self.control.subscribe(),
            Arc::clone(&self.in_flight),
            Arc::clone(&self.status),
        ));

        generation
    }

    pub fn task(&self) -> &Arc<T> {
        &self.task
    }
}

impl<T> SamplingScheduler<T> {
    /// Stop scheduling. An outstanding invocation is not aborted.
    pub fn stop(&mut self) {
        if matches!(*self.control.borrow(), Control::Stopped) {
            return;
        }
        self.control.send_replace(Control::Stopped);

        let mut status = self.status.lock();
        status.state = GenerationState::Stopped;
        info!(generation = %status.generation, "sampling scheduler stopped");
    }

    /// Id of the most recently created generation.
    pub fn generation(&self) -> GenerationId {
        self.status.lock().generation
    }

    /// State of the most recently created generation.
    pub fn state(&self) -> GenerationState {
        self.status.lock().state
    }

    /// State of any generation ever created by this scheduler.
    pub fn state_of(&self, generation: GenerationId) -> GenerationState {
        let status = self.status.lock();
        if generation == status.generation {
            status.state
        } else if matches!(status.state, GenerationState::Stopped) {
            GenerationState::Stopped
        } else {
            GenerationState::Superseded
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.control.borrow(), Control::Active(_))
    }
}

impl<T> Drop for SamplingScheduler<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_generation<T>(
    generation: GenerationId,
    interval: Duration,
    task: Arc<T>,
    mut control: watch::Receiver<Control>,
    in_flight: Arc<Semaphore>,
    status: Arc<Mutex<Status>>,
) where
    T: PollTask,
{
    loop {
        // Wait out any invocation still owned by a superseded generation
        let permit = tokio::select! {
            permit = Arc::clone(&in_flight).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = superseded(&mut control, generation) => break,
        };

        if !is_active(&control, generation) {
            break;
        }

        set_state(&status, generation, GenerationState::Running);
        let started = Instant::now();

        if let Err(error) = task.poll().await {
            warn!(%generation, %error, "poll task failed, rescheduling");
        }

        drop(permit);
        let elapsed = started.elapsed();

        if !is_active(&control, generation) {
            break;
        }

        set_state(&status, generation, GenerationState::Scheduled);

        let delay = interval.saturating_sub(elapsed);
        if delay.is_zero() {
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = superseded(&mut control, generation) => break,
        }
    }

    debug!(%generation, "sampling generation exited");
}

fn is_active(control: &watch::Receiver<Control>, generation: GenerationId) -> bool {
    *control.borrow() == Control::Active(generation)
}

/// Resolves once `generation` is no longer the active one (or the scheduler was dropped).
async fn superseded(control: &mut watch::Receiver<Control>, generation: GenerationId) {
    loop {
        if *control.borrow_and_update() != Control::Active(generation) {
            return;
        }
        if control.changed().await.is_err() {
            return;
        }
    }
}

fn set_state(status: &Mutex<Status>, generation: GenerationId, state: GenerationState) {
    let mut status = status.lock();
    if status.generation == generation && status.state != GenerationState::Stopped {
        status.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct RecordingTask {
        duration: Duration,
        fail: bool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        completed: AtomicUsize,
        starts: Mutex<Vec<Instant>>,
        ends: Mutex<Vec<Instant>>,
    }

    impl RecordingTask {
        fn new(duration: Duration) -> Self {
            Self {
                duration,
                fail: false,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                starts: Mutex::new(Vec::new()),
                ends: Mutex::new(Vec::new()),
            }
        }

        fn failing(duration: Duration) -> Self {
            Self {
                fail: true,
                ..Self::new(duration)
            }
        }

        fn starts(&self) -> Vec<Instant> {
            self.starts.lock().clone()
        }
    }

    #[async_trait]
    impl PollTask for RecordingTask {
        type Error = String;

        async fn poll(&self) -> Result<(), Self::Error> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.starts.lock().push(Instant::now());

            if !self.duration.is_zero() {
                tokio::time::sleep(self.duration).await;
            }

            self.ends.lock().push(Instant::now());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);

            if self.fail {
                Err("upstream unavailable".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn offsets(origin: Instant, instants: &[Instant]) -> Vec<u64> {
        instants
            .iter()
            .map(|instant| (*instant - origin).as_millis() as u64)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_tracks_interval() {
        let task = Arc::new(RecordingTask::new(Duration::from_millis(30)));
        let mut scheduler = SamplingScheduler::with_shared(Arc::clone(&task));
        let origin = Instant::now();

        scheduler.start(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(350)).await;
        scheduler.stop();

        assert_eq!(offsets(origin, &task.starts()), vec![0, 100, 200, 300]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_never_overlaps() {
        let task = Arc::new(RecordingTask::new(Duration::from_millis(300)));
        let mut scheduler = SamplingScheduler::with_shared(Arc::clone(&task));

        scheduler.start(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        scheduler.stop();

        assert_eq!(task.max_in_flight.load(Ordering::SeqCst), 1);

        let starts = task.starts();
        let ends = task.ends.lock().clone();
        assert!(starts.len() >= 3);
        for (end, next_start) in ends.iter().zip(starts.iter().skip(1)) {
            assert_eq!(*next_start, *end, "next invocation must start right after completion");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_supersedes_without_double_invoke() {
        let task = Arc::new(RecordingTask::new(Duration::from_millis(200)));
        let mut scheduler = SamplingScheduler::with_shared(Arc::clone(&task));
        let origin = Instant::now();

        let first = scheduler.start(Duration::from_millis(1_000));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.state(), GenerationState::Running);

        let second = scheduler.set_interval(Duration::from_millis(500));
        assert!(second > first);
        assert_eq!(scheduler.state_of(first), GenerationState::Superseded);

        tokio::time::sleep(Duration::from_millis(1_250)).await;
        scheduler.stop();

        // first invocation finishes at 200ms, the new generation starts right after it
        // and nothing from the superseded generation fires at 1000ms
        assert_eq!(offsets(origin, &task.starts()), vec![0, 200, 700, 1_200]);
        assert_eq!(task.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_invocation_finish() {
        let task = Arc::new(RecordingTask::new(Duration::from_millis(200)));
        let mut scheduler = SamplingScheduler::with_shared(Arc::clone(&task));

        scheduler.start(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.state(), GenerationState::Stopped);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(task.completed.load(Ordering::SeqCst), 1);
        assert_eq!(task.starts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_swallowed_and_rescheduled() {
        let task = Arc::new(RecordingTask::failing(Duration::ZERO));
        let mut scheduler = SamplingScheduler::with_shared(Arc::clone(&task));

        scheduler.start(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert_eq!(task.completed.load(Ordering::SeqCst), 5);
        assert!(scheduler.is_running());
        assert_eq!(scheduler.state(), GenerationState::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_scheduling() {
        let task = Arc::new(RecordingTask::new(Duration::ZERO));
        {
            let mut scheduler = SamplingScheduler::with_shared(Arc::clone(&task));
            scheduler.start(Duration::from_millis(100));
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        let before = task.completed.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(task.completed.load(Ordering::SeqCst), before);
    }
}
