//! SharedScheduler: the engine-wide worker pool.
//!
//! One dedicated multi-thread tokio runtime carries every probe run,
//! periodic trigger and listener notification. The pool has an explicit
//! lifecycle:
//!
//! ```text
//! INITIALIZED ──start()──▶ RUNNING ──shutdown()──▶ SHUTTING_DOWN ──▶ SHUTDOWN
//!                              ▲                                      │
//!                              └──────────────start() / restart()─────┘
//! ```
//!
//! Work is only accepted while RUNNING. `shutdown()` signals every
//! [`CancelSignal`], waits up to the configured timeout for in-flight work,
//! then drops whatever is left.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use vital_core::SchedulerConfig;

use crate::error::{SchedulerError, SchedulerResult};

// ── State ─────────────────────────────────────────────────────────

/// Lifecycle state of a [`SharedScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SchedulerState {
    Initialized = 0,
    Running = 1,
    ShuttingDown = 2,
    Shutdown = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Initialized,
            1 => SchedulerState::Running,
            2 => SchedulerState::ShuttingDown,
            _ => SchedulerState::Shutdown,
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Initialized => "INITIALIZED",
            SchedulerState::Running => "RUNNING",
            SchedulerState::ShuttingDown => "SHUTTING_DOWN",
            SchedulerState::Shutdown => "SHUTDOWN",
        };
        f.write_str(s)
    }
}

// ── Cancellation ──────────────────────────────────────────────────

/// Cooperative cancellation handed to scheduled work.
///
/// Fires when the owning periodic task is cancelled or when the pool shuts
/// down, whichever happens first.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    task: watch::Receiver<bool>,
    pool: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.task.borrow() || *self.pool.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&mut self) {
        let Self { task, pool } = self;
        tokio::select! {
            _ = wait_for_true(task) => {}
            _ = wait_for_true(pool) => {}
        }
    }
}

/// Waits until the channel holds `true`. A closed channel never fires.
async fn wait_for_true(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Handle to a recurring task started by the pool.
#[derive(Debug)]
pub struct TaskHandle {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Request cooperative cancellation. A run in progress sees its
    /// [`CancelSignal`] fire and no further runs start.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and drop the task at its next await point.
    pub fn abort(&self) {
        self.cancel();
        self.handle.abort();
    }

    /// Wait for the task loop to exit.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

// ── In-flight accounting ──────────────────────────────────────────

#[derive(Default)]
struct Tracker {
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Tracker {
    async fn wait_idle(&self) {
        loop {
            let mut notified = std::pin::pin!(self.idle.notified());
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Counts a task as in flight until dropped.
struct InFlight(Arc<Tracker>);

impl InFlight {
    fn enter(tracker: &Arc<Tracker>) -> Self {
        tracker.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(tracker))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// ── SharedScheduler ───────────────────────────────────────────────

struct Inner {
    config: SchedulerConfig,
    state: AtomicU8,
    runtime: Mutex<Option<Runtime>>,
    /// Pool-wide cancellation, reset to `false` on every start.
    shutdown_tx: watch::Sender<bool>,
    tracker: Arc<Tracker>,
}

impl Inner {
    fn lock_runtime(&self) -> MutexGuard<'_, Option<Runtime>> {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(runtime) = runtime {
            self.shutdown_tx.send_replace(true);
            runtime.shutdown_background();
        }
    }
}

/// Engine-wide worker pool. Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct SharedScheduler {
    inner: Arc<Inner>,
}

impl SharedScheduler {
    /// Build the pool and start it.
    pub fn new(config: SchedulerConfig) -> SchedulerResult<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        let scheduler = Self {
            inner: Arc::new(Inner {
                config,
                state: AtomicU8::new(SchedulerState::Initialized as u8),
                runtime: Mutex::new(None),
                shutdown_tx,
                tracker: Arc::new(Tracker::default()),
            }),
        };
        scheduler.start()?;
        Ok(scheduler)
    }

    pub fn with_defaults() -> SchedulerResult<Self> {
        Self::new(SchedulerConfig::default())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Number of accepted tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.in_flight.load(Ordering::SeqCst)
    }

    /// (Re)create the worker runtime. A no-op while already running.
    pub fn start(&self) -> SchedulerResult<()> {
        let mut runtime = self.inner.lock_runtime();
        match self.state() {
            SchedulerState::Running => return Ok(()),
            state @ SchedulerState::ShuttingDown => {
                return Err(SchedulerError::Rejected { state });
            }
            SchedulerState::Initialized | SchedulerState::Shutdown => {}
        }

        let config = &self.inner.config;
        let prefix = config.thread_name_prefix.clone();
        let thread_seq = AtomicUsize::new(0);
        let built = Builder::new_multi_thread()
            .worker_threads(config.pool_size)
            .thread_name_fn(move || {
                format!("{prefix}-{}", thread_seq.fetch_add(1, Ordering::Relaxed))
            })
            .enable_all()
            .build()?;

        self.inner.shutdown_tx.send_replace(false);
        *runtime = Some(built);
        self.inner
            .state
            .store(SchedulerState::Running as u8, Ordering::SeqCst);

        info!(
            pool_size = config.pool_size,
            prefix = %config.thread_name_prefix,
            "scheduler started"
        );
        Ok(())
    }

    /// Stop accepting work, signal cancellation, wait up to the shutdown
    /// timeout for in-flight tasks, then drop the rest.
    pub async fn shutdown(&self) {
        let transitioned = self.inner.state.compare_exchange(
            SchedulerState::Running as u8,
            SchedulerState::ShuttingDown as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if transitioned.is_err() {
            debug!(state = %self.state(), "shutdown requested while not running");
            return;
        }

        info!(in_flight = self.in_flight(), "scheduler shutting down");
        self.inner.shutdown_tx.send_replace(true);

        let timeout = self.inner.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.inner.tracker.wait_idle()).await.is_err() {
            warn!(
                in_flight = self.in_flight(),
                ?timeout,
                "in-flight tasks did not finish in time, cancelling"
            );
        }

        self.stop_runtime();
        info!("scheduler shut down");
    }

    /// Immediate shutdown without waiting. Safe to call from `Drop`.
    pub fn shutdown_now(&self) {
        if self.state() == SchedulerState::Shutdown {
            return;
        }
        self.inner
            .state
            .store(SchedulerState::ShuttingDown as u8, Ordering::SeqCst);
        self.inner.shutdown_tx.send_replace(true);
        self.stop_runtime();
        debug!("scheduler stopped without draining");
    }

    /// Shut down (if running) and start again.
    pub async fn restart(&self) -> SchedulerResult<()> {
        self.shutdown().await;
        self.start()?;
        info!("scheduler restarted");
        Ok(())
    }

    fn stop_runtime(&self) {
        let runtime = self.inner.lock_runtime().take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
        self.inner
            .state
            .store(SchedulerState::Shutdown as u8, Ordering::SeqCst);
    }

    /// A signal that fires when the pool shuts down.
    pub fn signal(&self) -> CancelSignal {
        let (_, task) = watch::channel(false);
        CancelSignal {
            task,
            pool: self.inner.shutdown_tx.subscribe(),
        }
    }

    fn task_signal(&self) -> (watch::Sender<bool>, CancelSignal) {
        let (cancel_tx, task) = watch::channel(false);
        let signal = CancelSignal {
            task,
            pool: self.inner.shutdown_tx.subscribe(),
        };
        (cancel_tx, signal)
    }

    fn handle(&self) -> SchedulerResult<Handle> {
        let state = self.state();
        if state != SchedulerState::Running {
            return Err(SchedulerError::Rejected { state });
        }
        self.inner
            .lock_runtime()
            .as_ref()
            .map(|runtime| runtime.handle().clone())
            .ok_or(SchedulerError::Rejected {
                state: self.state(),
            })
    }

    fn spawn_tracked<F>(&self, future: F) -> SchedulerResult<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = self.handle()?;
        let guard = InFlight::enter(&self.inner.tracker);
        Ok(handle.spawn(async move {
            let _guard = guard;
            future.await
        }))
    }

    // ── Submission ────────────────────────────────────────────────

    /// Run a task, discarding its handle.
    pub fn execute<F>(&self, future: F) -> SchedulerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_tracked(future).map(drop)
    }

    /// Run a task and return its handle.
    pub fn submit<F>(&self, future: F) -> SchedulerResult<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.spawn_tracked(future)
    }

    /// Run a task once after `delay`. Resolves to `None` if the pool shut
    /// down before the delay elapsed.
    pub fn schedule<F>(
        &self,
        delay: Duration,
        future: F,
    ) -> SchedulerResult<JoinHandle<Option<F::Output>>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let mut signal = self.signal();
        self.spawn_tracked(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => Some(future.await),
                _ = signal.cancelled() => None,
            }
        })
    }

    /// Run `task` after `initial_delay`, then again `delay` after each run
    /// completes, until cancelled.
    pub fn schedule_with_fixed_delay<F, Fut>(
        &self,
        initial_delay: Duration,
        delay: Duration,
        task: F,
    ) -> SchedulerResult<TaskHandle>
    where
        F: FnMut(CancelSignal) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if delay.is_zero() {
            return Err(SchedulerError::InvalidArgument(
                "delay must be greater than zero".to_string(),
            ));
        }
        let (cancel_tx, signal) = self.task_signal();
        let handle = self.spawn_tracked(run_fixed_delay(initial_delay, delay, task, signal))?;
        Ok(TaskHandle { cancel_tx, handle })
    }

    /// Start `task` every `period` after `initial_delay`, until cancelled.
    /// A run that overlaps the next tick delays it; ticks never burst.
    pub fn schedule_at_fixed_rate<F, Fut>(
        &self,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) -> SchedulerResult<TaskHandle>
    where
        F: FnMut(CancelSignal) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(SchedulerError::InvalidArgument(
                "period must be greater than zero".to_string(),
            ));
        }
        let (cancel_tx, signal) = self.task_signal();
        let handle = self.spawn_tracked(run_fixed_rate(initial_delay, period, task, signal))?;
        Ok(TaskHandle { cancel_tx, handle })
    }
}

impl fmt::Debug for SharedScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedScheduler")
            .field("state", &self.state())
            .field("pool_size", &self.inner.config.pool_size)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

// ── Periodic loops ────────────────────────────────────────────────

async fn run_fixed_delay<F, Fut>(
    initial_delay: Duration,
    delay: Duration,
    mut task: F,
    mut signal: CancelSignal,
) where
    F: FnMut(CancelSignal) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut wait = initial_delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = signal.cancelled() => break,
        }
        task(signal.clone()).await;
        if signal.is_cancelled() {
            break;
        }
        wait = delay;
    }
    debug!("fixed-delay task stopped");
}

async fn run_fixed_rate<F, Fut>(
    initial_delay: Duration,
    period: Duration,
    mut task: F,
    mut signal: CancelSignal,
) where
    F: FnMut(CancelSignal) -> Fut,
    Fut: Future<Output = ()>,
{
    let start = tokio::time::Instant::now() + initial_delay;
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = signal.cancelled() => break,
        }
        task(signal.clone()).await;
        if signal.is_cancelled() {
            break;
        }
    }
    debug!("fixed-rate task stopped");
}
