//! Time sources and timers.
//!
//! The engine never reads the wall clock or spawns timers directly. It goes through
//! [`Clock`] and [`Timer`] so a virtual clock can drive it in tests. The default
//! [`TokioClock`] is built on `tokio::time`, which honours `tokio::time::pause()`
//! and `#[tokio::test(start_paused = true)]`.

use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::{task::AbortHandle, time::Instant};

/// A monotonic time source
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Something that can run a task after a delay and cancel it
pub trait Timer: Clone + Send + Sync + 'static {
    /// Runs `task` once `delay` has elapsed. Dropping the returned handle does not
    /// cancel the task; call [`CancelHandle::cancel`] for that.
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> CancelHandle;
}

/// Cancels a task scheduled through a [`Timer`]
#[derive(Debug)]
pub struct CancelHandle {
    abort: AbortHandle,
}

impl CancelHandle {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }

    /// Cancels the scheduled task. Takes effect immediately if the timer has not fired yet.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Whether the scheduled task has run to completion or been cancelled
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Clock and timer backed by the tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl Timer for TokioClock {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> CancelHandle {
        let handle = spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        });
        CancelHandle::new(handle)
    }
}

/// Spawns a detached task on the current tokio runtime.
///
/// Panics if called outside a runtime, like `tokio::spawn`.
pub(crate) fn spawn<F>(future: F) -> AbortHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future).abort_handle()
}

/// A clock that only moves when told to
///
/// Useful for exercising cache freshness without a runtime.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Moves the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}
