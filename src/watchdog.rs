/// Timeout-warning watchdogs around a unit of work.
///
/// A watchdog arms one delayed warning per threshold, awaits the unit of
/// work, then disarms every warning exactly once whatever the outcome. Two
/// teardown strategies are provided and kept structurally distinct:
///
/// - `Callback`: one callback timer per threshold, each cleared through its
///   own handle.
/// - `Signal`: one suspended sleep task per threshold, all registered
///   against a single `CancellationToken` that is cancelled once.
///
/// The unit of work's output is returned unchanged.
use crate::timers::{Cancelled, TimerHandle, Timers};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Passed to the warning handler when a threshold elapses before the unit
/// of work settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningEvent {
    pub timeout_time: Duration,
}

pub type WarningHandler = Arc<dyn Fn(WarningEvent) + Send + Sync>;

/// Which teardown strategy a watchdog uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogKind {
    /// Independent callback timers, cleared one by one.
    Callback,
    /// Sleep tasks sharing one cancellation signal.
    Signal,
}

impl WatchdogKind {
    pub fn name(&self) -> &'static str {
        match self {
            WatchdogKind::Callback => "callback",
            WatchdogKind::Signal => "signal",
        }
    }

    /// Label of the per-phase stopwatch.
    pub fn timer_label(&self) -> &'static str {
        match self {
            WatchdogKind::Callback => "wat-callback",
            WatchdogKind::Signal => "wat-signal",
        }
    }
}

impl std::fmt::Display for WatchdogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

struct Shared {
    handler: Option<WarningHandler>,
    thresholds: Vec<Duration>,
    warnings: AtomicU64,
    teardowns: AtomicU64,
}

impl Shared {
    fn warn(&self, timeout_time: Duration) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
        if let Some(handler) = &self.handler {
            handler(WarningEvent { timeout_time });
        }
    }
}

/// A reusable watchdog: fixed thresholds and handler, one instance armed per
/// `run` call.
#[derive(Clone)]
pub struct Watchdog {
    kind: WatchdogKind,
    timers: Timers,
    shared: Arc<Shared>,
}

impl Watchdog {
    pub fn new(
        kind: WatchdogKind,
        timers: Timers,
        handler: Option<WarningHandler>,
        thresholds: Vec<Duration>,
    ) -> Self {
        Self {
            kind,
            timers,
            shared: Arc::new(Shared {
                handler,
                thresholds,
                warnings: AtomicU64::new(0),
                teardowns: AtomicU64::new(0),
            }),
        }
    }

    pub fn kind(&self) -> WatchdogKind {
        self.kind
    }

    /// Warnings fired across all `run` calls so far.
    pub fn warnings_fired(&self) -> u64 {
        self.shared.warnings.load(Ordering::Relaxed)
    }

    /// Teardowns performed across all `run` calls so far.
    pub fn teardowns(&self) -> u64 {
        self.shared.teardowns.load(Ordering::Relaxed)
    }

    /// Run `unit_of_work` under the watchdog and return its output.
    ///
    /// Teardown happens once the unit of work settles and before this
    /// returns. It also happens if the unit of work panics or this future
    /// is dropped before completion.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn run<F>(&self, unit_of_work: F) -> F::Output
    where
        F: Future,
    {
        match self.kind {
            WatchdogKind::Callback => self.run_with_callback_timers(unit_of_work).await,
            WatchdogKind::Signal => self.run_with_abort_signal(unit_of_work).await,
        }
    }

    async fn run_with_callback_timers<F>(&self, unit_of_work: F) -> F::Output
    where
        F: Future,
    {
        let handles = self
            .shared
            .thresholds
            .iter()
            .map(|&threshold| {
                let shared = Arc::clone(&self.shared);
                self.timers
                    .set_timeout(threshold, move || shared.warn(threshold))
            })
            .collect();

        let _teardown = ClearTimers {
            timers: &self.timers,
            shared: &self.shared,
            handles,
        };
        unit_of_work.await
    }

    async fn run_with_abort_signal<F>(&self, unit_of_work: F) -> F::Output
    where
        F: Future,
    {
        let signal = CancellationToken::new();

        for &threshold in &self.shared.thresholds {
            let sleep = self.timers.arm_sleep(threshold, &signal);
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                match sleep.wait().await {
                    Ok(()) => shared.warn(threshold),
                    Err(Cancelled) => {
                        tracing::trace!(?threshold, "warning cancelled before it fired");
                    }
                }
            });
        }

        let _teardown = TriggerSignal {
            shared: &self.shared,
            signal,
        };
        unit_of_work.await
    }
}

/// Clears every callback timer when dropped.
struct ClearTimers<'a> {
    timers: &'a Timers,
    shared: &'a Shared,
    handles: Vec<TimerHandle>,
}

impl Drop for ClearTimers<'_> {
    fn drop(&mut self) {
        for handle in &self.handles {
            self.timers.clear_timeout(handle);
        }
        self.shared.teardowns.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cancels the shared signal when dropped.
struct TriggerSignal<'a> {
    shared: &'a Shared,
    signal: CancellationToken,
}

impl Drop for TriggerSignal<'_> {
    fn drop(&mut self) {
        self.signal.cancel();
        self.shared.teardowns.fetch_add(1, Ordering::Relaxed);
    }
}
