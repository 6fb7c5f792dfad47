//! Real-time periodic task threads.
//!
//! An [`RtTask`] runs a [`PeriodicTask`] on a dedicated OS thread:
//!
//! 1. `pre()` runs once; returning `false` aborts the start.
//! 2. The thread switches to the configured real-time policy and priority,
//!    locks process memory and pre-faults its stack. Any failure aborts.
//! 3. `update()` runs at every absolute wake time `start + k * period` until
//!    it returns `false` or the task is stopped.
//! 4. `post()` runs once. It runs whenever `pre()` ran, including after an
//!    aborted start.
//!
//! Wake times advance from the previous wake time, never from "now", so long
//! iterations do not accumulate drift. An iteration that overruns its period
//! is followed immediately by exactly one more; wake times the overrun
//! skipped entirely are dropped from the schedule, which stays on the
//! `start + k * period` grid. Both are counted in [`TaskStats::overruns`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use super::clock::Timespec;
use super::config::{STACK_PREFAULT_SIZE, TaskConfig};
use crate::error::{BswError, Result};
use crate::sys;

/// Application callbacks of a periodic task.
pub trait PeriodicTask: Send + 'static {
    /// Called once on the task thread before the loop. Return `false` to
    /// abort the start.
    fn pre(&mut self) -> bool {
        true
    }

    /// Called once per period. Return `false` to stop the loop.
    fn update(&mut self) -> bool;

    /// Called once on the task thread after the loop.
    fn post(&mut self) {}
}

/// Adapts a closure into a [`PeriodicTask`] with no-op `pre`/`post`.
#[derive(Debug)]
pub struct FnTask<F>(F);

impl<F> FnTask<F>
where
    F: FnMut() -> bool + Send + 'static,
{
    pub fn new(update: F) -> Self {
        Self(update)
    }
}

impl<F> PeriodicTask for FnTask<F>
where
    F: FnMut() -> bool + Send + 'static,
{
    fn update(&mut self) -> bool {
        (self.0)()
    }
}

/// Counters updated by the task thread.
#[derive(Debug, Default)]
pub struct TaskStats {
    iterations: AtomicU64,
    overruns: AtomicU64,
}

impl TaskStats {
    /// Number of `update()` calls.
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Number of wake times that had passed before the preceding iteration
    /// finished, including those skipped to rejoin the schedule.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Requests a running task to stop from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    /// Clear the running flag. The loop exits after at most one more
    /// iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A periodic task bound to its own real-time thread.
///
/// Dropping a started task stops it and joins the thread.
#[derive(Debug)]
pub struct RtTask<T: PeriodicTask> {
    config: TaskConfig,
    running: Arc<AtomicBool>,
    stats: Arc<TaskStats>,
    task: Option<T>,
    thread: Option<JoinHandle<Option<T>>>,
}

impl<T: PeriodicTask> RtTask<T> {
    /// Create a task without starting its thread.
    pub fn new(config: TaskConfig, task: T) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(TaskStats::default()),
            task: Some(task),
            thread: None,
        }
    }

    /// Create a task and start its thread.
    pub fn spawn(config: TaskConfig, task: T) -> Result<Self> {
        let mut rt = Self::new(config, task);
        rt.create_thread()?;
        Ok(rt)
    }

    /// Start the task thread.
    ///
    /// Returns once the thread is running its loop, or with the error that
    /// prevented it (`pre()` refusal, real-time setup failure or a failed
    /// thread spawn). After a failed start the task value is available again
    /// through [`RtTask::task`].
    pub fn create_thread(&mut self) -> Result<()> {
        if self.thread.is_some() || self.task.is_none() {
            return Err(BswError::AlreadyStarted);
        }

        let (task_tx, task_rx) = mpsc::sync_channel::<T>(1);
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);

        // Set before the thread exists so an early stop() is never lost.
        self.running.store(true, Ordering::Release);

        let mut builder = thread::Builder::new();
        if let Some(name) = self.config.name() {
            builder = builder.name(name.to_string());
        }
        if let Some(size) = self.config.stack_size() {
            builder = builder.stack_size(size);
        }
        // The task is handed over only once the thread exists, so a failed
        // spawn leaves it with the owner.
        let handle = builder
            .spawn(move || {
                let task = task_rx.recv().ok()?;
                Some(task_main(task, config, running, stats, ready_tx))
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                error!(error = %e, "failed to spawn real-time thread");
                BswError::Io(e)
            })?;

        if let Some(task) = self.task.take() {
            if let Err(mpsc::SendError(task)) = task_tx.send(task) {
                self.task = Some(task);
            }
        }
        drop(task_tx);

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    name = self.config.name().unwrap_or("rt-task"),
                    priority = self.config.priority(),
                    period_us = self.config.period().as_micros() as u64,
                    "real-time task started"
                );
                self.thread = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                self.task = handle.join().map_err(|_| BswError::ThreadPanicked)?;
                Err(e)
            }
            // The thread dropped the sender without reporting: it panicked.
            Err(_) => {
                self.running.store(false, Ordering::Release);
                if let Ok(Some(task)) = handle.join() {
                    self.task = Some(task);
                }
                Err(BswError::ThreadPanicked)
            }
        }
    }

    /// Join the task thread, blocking until it exits.
    ///
    /// This does not stop the loop; call [`RtTask::stop`] first unless the
    /// task stops itself. The task value is kept and the thread can be
    /// started again.
    pub fn close_thread(&mut self) -> Result<()> {
        let handle = self.thread.take().ok_or(BswError::NotStarted)?;
        match handle.join() {
            Ok(task) => {
                self.task = task;
                debug!(
                    name = self.config.name().unwrap_or("rt-task"),
                    iterations = self.stats.iterations(),
                    "real-time task joined"
                );
                Ok(())
            }
            Err(_) => {
                self.running.store(false, Ordering::Release);
                Err(BswError::ThreadPanicked)
            }
        }
    }

    /// Stop the loop and join the thread.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stop();
        self.close_thread()
    }

    /// Clear the running flag.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// A handle that can stop this task from other threads.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Check if the loop is running or about to run.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Check if a thread was started and not yet joined.
    pub fn is_started(&self) -> bool {
        self.thread.is_some()
    }

    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// The task value while no thread owns it.
    pub fn task(&self) -> Option<&T> {
        self.task.as_ref()
    }

    pub fn task_mut(&mut self) -> Option<&mut T> {
        self.task.as_mut()
    }

    /// Stop and join the thread, then return the task value.
    pub fn into_task(mut self) -> Result<T> {
        if self.thread.is_some() {
            self.shutdown()?;
        }
        self.task.take().ok_or(BswError::NotStarted)
    }
}

impl<T: PeriodicTask> Drop for RtTask<T> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.shutdown() {
                warn!(error = %e, "real-time task did not shut down cleanly");
            }
        }
    }
}

/// Body of the task thread. Returns the task so the owner can take it back.
fn task_main<T: PeriodicTask>(
    mut task: T,
    config: TaskConfig,
    running: Arc<AtomicBool>,
    stats: Arc<TaskStats>,
    ready: SyncSender<Result<()>>,
) -> T {
    if !task.pre() {
        warn!("real-time task precondition failed");
        running.store(false, Ordering::Release);
        task.post();
        let _ = ready.send(Err(BswError::PreconditionFailed));
        return task;
    }

    let start = match realtime_setup(&config) {
        Ok(start) => start,
        Err(e) => {
            error!(error = %e, "real-time setup failed");
            running.store(false, Ordering::Release);
            task.post();
            let _ = ready.send(Err(e));
            return task;
        }
    };

    let _ = ready.send(Ok(()));
    drop(ready);

    run_loop(&mut task, start, config.period_nanos(), &running, &stats);

    running.store(false, Ordering::Release);
    task.post();
    task
}

/// Apply scheduling and memory settings to the current thread and return the
/// first wake time.
fn realtime_setup(config: &TaskConfig) -> Result<Timespec> {
    if let Some(policy) = config.policy().os_policy() {
        sys::set_thread_scheduler(policy, config.priority())
            .map_err(|e| BswError::realtime("sched_setscheduler", e))?;
    }
    if config.lock_memory() {
        sys::lock_memory().map_err(|e| BswError::realtime("mlockall", e))?;
    }
    if config.stack_prefault() {
        stack_prefault();
    }

    let now = Timespec::now().map_err(|e| BswError::realtime("clock_gettime", e))?;
    Ok(now.add_duration(config.start_delay()))
}

/// Touch a stack region so the first iterations do not page fault.
#[inline(never)]
fn stack_prefault() {
    let stack = [0u8; STACK_PREFAULT_SIZE];
    std::hint::black_box(&stack);
}

fn run_loop<T: PeriodicTask>(
    task: &mut T,
    mut wake: Timespec,
    period_nanos: i64,
    running: &AtomicBool,
    stats: &TaskStats,
) {
    while running.load(Ordering::Acquire) {
        if let Err(e) = wake.sleep_until() {
            error!(error = %e, "periodic sleep failed");
            break;
        }

        stats.iterations.fetch_add(1, Ordering::Relaxed);
        if !task.update() {
            debug!("real-time task update requested stop");
            running.store(false, Ordering::Release);
        }

        wake = wake.add_nanos(period_nanos);
        if let Ok(now) = Timespec::now() {
            let (next, missed) = next_wake(wake, now, period_nanos);
            if now > wake {
                stats.overruns.fetch_add(missed + 1, Ordering::Relaxed);
                debug!(
                    late_us = now.saturating_duration_since(wake).as_micros() as u64,
                    skipped = missed,
                    "real-time task overran its period"
                );
            }
            wake = next;
        }
    }
}

/// Skip whole periods that lie entirely behind `now`.
///
/// Returns the next wake time on the same grid and the number of skipped
/// slots. The result is never more than one period in the past, so at most
/// one iteration follows an overrun without sleeping.
fn next_wake(wake: Timespec, now: Timespec, period_nanos: i64) -> (Timespec, u64) {
    let behind = now.saturating_duration_since(wake).as_nanos();
    let missed = (behind / period_nanos as u128).min(i64::MAX as u128) as i64;
    if missed == 0 {
        return (wake, 0);
    }
    (wake.add_nanos(missed.saturating_mul(period_nanos)), missed as u64)
}
