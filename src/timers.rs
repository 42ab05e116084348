/// Timer primitives the watchdogs are built on.
///
/// Two flavors over the tokio timer wheel:
/// - `set_timeout` / `clear_timeout`: fire-and-forget callback timers, each
///   with its own handle that is cancelled directly.
/// - `sleep` / `arm_sleep`: a suspend-until-elapsed future that resolves
///   early with `Err(Cancelled)` once a shared `CancellationToken` is
///   triggered.
///
/// Both flavors fix their deadline when armed, not when their task is
/// first polled.
///
/// Every timer is counted in shared `TimerStats` so callers can check that
/// nothing is left armed after a watchdog tears down.
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CLEARED: u8 = 2;

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    fired: AtomicU64,
    cleared: AtomicU64,
    cancelled: AtomicU64,
    pending: AtomicU64,
}

/// Point-in-time copy of the timer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// Timers and sleeps started.
    pub scheduled: u64,
    /// Timers whose delay elapsed.
    pub fired: u64,
    /// Callback timers cleared before firing.
    pub cleared: u64,
    /// Sleeps that observed their cancellation signal before elapsing.
    pub cancelled: u64,
    /// Timers and sleeps whose futures are still alive.
    pub pending: u64,
}

/// Returned by `Timers::sleep` when the signal fires before the delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer cancelled before it elapsed")
    }
}

impl std::error::Error for Cancelled {}

/// Handle to a callback timer armed with `Timers::set_timeout`.
#[derive(Debug)]
pub struct TimerHandle {
    task: AbortHandle,
    state: Arc<AtomicU8>,
}

impl TimerHandle {
    /// Whether the callback has already run.
    #[cfg(test)]
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }
}

/// Decrements the pending gauge when the owning future is dropped,
/// whether it completed or was aborted.
#[derive(Debug)]
struct PendingGuard(Arc<Counters>);

impl PendingGuard {
    fn new(counters: &Arc<Counters>) -> Self {
        counters.scheduled.fetch_add(1, Ordering::Relaxed);
        counters.pending.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counters))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A sleep armed against a cancellation signal but not yet awaited.
///
/// Counted as scheduled and pending from the moment it is armed, and its
/// deadline is fixed then too, so it can be moved into a task that is
/// polled later.
#[derive(Debug)]
pub struct ArmedSleep {
    deadline: Instant,
    signal: CancellationToken,
    guard: PendingGuard,
}

impl ArmedSleep {
    /// Wait for the deadline or the signal, whichever comes first. An
    /// already-cancelled signal resolves immediately.
    pub async fn wait(self) -> Result<(), Cancelled> {
        let counters = &self.guard.0;

        if self.signal.is_cancelled() {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
            return Err(Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.signal.cancelled() => {
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                Err(Cancelled)
            }
            _ = tokio::time::sleep_until(self.deadline) => {
                counters.fired.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }
}

/// Shared entry point to both timer flavors. Cloning is cheap; clones share
/// the same counters.
#[derive(Debug, Clone, Default)]
pub struct Timers {
    counters: Arc<Counters>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once after `delay`, unless cleared first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = PendingGuard::new(&self.counters);
        let deadline = Instant::now() + delay;
        let state = Arc::new(AtomicU8::new(ARMED));
        let task_state = Arc::clone(&state);
        let counters = Arc::clone(&self.counters);

        let join = tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep_until(deadline).await;
            if task_state
                .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                counters.fired.fetch_add(1, Ordering::Relaxed);
                callback();
            }
        });

        TimerHandle {
            task: join.abort_handle(),
            state,
        }
    }

    /// Cancel a callback timer. Clearing one that already fired, or was
    /// already cleared, does nothing.
    pub fn clear_timeout(&self, handle: &TimerHandle) {
        if handle
            .state
            .compare_exchange(ARMED, CLEARED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            handle.task.abort();
            self.counters.cleared.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Arm a sleep of `delay` from now, cancellable through `signal`.
    pub fn arm_sleep(&self, delay: Duration, signal: &CancellationToken) -> ArmedSleep {
        ArmedSleep {
            deadline: Instant::now() + delay,
            signal: signal.clone(),
            guard: PendingGuard::new(&self.counters),
        }
    }

    /// Suspend until `delay` elapses or `signal` is cancelled, whichever
    /// comes first. An already-cancelled signal resolves immediately.
    pub async fn sleep(&self, delay: Duration, signal: &CancellationToken) -> Result<(), Cancelled> {
        self.arm_sleep(delay, signal).wait().await
    }

    pub fn stats(&self) -> TimerStats {
        TimerStats {
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            fired: self.counters.fired.load(Ordering::Relaxed),
            cleared: self.counters.cleared.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    pub fn pending(&self) -> u64 {
        self.counters.pending.load(Ordering::Acquire)
    }

    /// Yield to the scheduler until no timer is pending, giving aborted and
    /// cancelled timers the chance to be dropped. Returns `false` if some
    /// are still pending after `max_yields` rounds.
    pub async fn settle(&self, max_yields: usize) -> bool {
        for _ in 0..max_yields {
            if self.pending() == 0 {
                return true;
            }
            tokio::task::yield_now().await;
        }
        self.pending() == 0
    }
}
