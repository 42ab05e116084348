/// Benchmark driver: runs each selected watchdog variant around a short
/// unit of work for a fixed number of iterations and prints timing lines.
///
/// Phases run back to back in one process. A forced collection precedes
/// each phase, but scheduler and allocator state carry over from earlier
/// phases; use `--variant` to run a single phase per process when that
/// matters.
use crate::collect::{reset_baseline, CollectError, Collector};
use crate::config::BenchConfig;
use crate::memory::{self, MemoryBaseline};
use crate::stopwatch::{group_thousands, LineSink, Stopwatch};
use crate::timers::{TimerStats, Timers};
use crate::watchdog::{WarningEvent, WarningHandler, Watchdog, WatchdogKind};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one phase.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub kind: WatchdogKind,
    /// Iterations completed.
    pub iterations: u64,
    pub elapsed: Duration,
    pub warnings_fired: u64,
    pub timers: TimerStats,
}

/// Outcome of a full run.
#[derive(Debug, Clone)]
pub struct BenchReport {
    pub phases: Vec<PhaseReport>,
    pub total: Duration,
}

pub type WorkError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that end a run.
#[derive(Debug)]
pub enum BenchError {
    /// Forced collection was required but is not available.
    Collect(CollectError),
    /// The unit of work failed.
    Work { iteration: u64, source: WorkError },
}

impl std::fmt::Display for BenchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BenchError::Collect(e) => write!(f, "{e}"),
            BenchError::Work { iteration, source } => {
                write!(f, "unit of work failed at iteration {iteration}: {source}")
            }
        }
    }
}

impl std::error::Error for BenchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BenchError::Collect(e) => Some(e),
            BenchError::Work { source, .. } => Some(source.as_ref()),
        }
    }
}

impl From<CollectError> for BenchError {
    fn from(e: CollectError) -> Self {
        BenchError::Collect(e)
    }
}

/// Logs and otherwise ignores a warning.
fn log_warning() -> WarningHandler {
    Arc::new(|event: WarningEvent| {
        tracing::warn!(
            timeout_time = ?event.timeout_time,
            "unit of work still running past warning threshold"
        );
    })
}

/// The default unit of work: sleep for `duration`.
async fn sleep_for(duration: Duration) -> Result<(), WorkError> {
    tokio::time::sleep(duration).await;
    Ok(())
}

pub struct Bench<'a> {
    config: &'a BenchConfig,
    collector: &'a dyn Collector,
    sink: LineSink,
}

impl<'a> Bench<'a> {
    pub fn new(config: &'a BenchConfig, collector: &'a dyn Collector, sink: LineSink) -> Self {
        Self {
            config,
            collector,
            sink,
        }
    }

    /// Run every configured phase with the sleeping unit of work.
    pub async fn run(&self) -> Result<BenchReport, BenchError> {
        let work = self.config.work_duration();
        self.run_with(move || sleep_for(work)).await
    }

    /// Run every configured phase around units of work produced by `work`.
    pub async fn run_with<W, Fut, E>(&self, mut work: W) -> Result<BenchReport, BenchError>
    where
        W: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<WorkError>,
    {
        let spin_up = self.config.spin_up();
        if !spin_up.is_zero() {
            tracing::debug!(?spin_up, "spinning up runtime");
            tokio::time::sleep(spin_up).await;
        }

        let global = Stopwatch::start("GLOBAL", &self.sink);
        let mut phases = Vec::with_capacity(self.config.variants.len());
        for &kind in &self.config.variants {
            phases.push(self.run_phase(kind, &global, &mut work).await?);
        }
        let total = global.end();

        Ok(BenchReport { phases, total })
    }

    async fn run_phase<W, Fut, E>(
        &self,
        kind: WatchdogKind,
        global: &Stopwatch,
        work: &mut W,
    ) -> Result<PhaseReport, BenchError>
    where
        W: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<WorkError>,
    {
        global.log(&format!("testing {kind} based"));
        let phase = Stopwatch::start(kind.timer_label(), &self.sink);

        reset_baseline(self.collector, self.config.require_collection)?;
        let mut mem = MemoryBaseline::default();
        if self.config.log_memory {
            mem.reset();
        }

        let timers = Timers::new();
        let watchdog = Watchdog::new(
            kind,
            timers.clone(),
            Some(log_warning()),
            self.config.thresholds(),
        );
        tracing::info!(
            variant = %watchdog.kind(),
            iterations = self.config.iterations,
            "phase started"
        );

        for i in 0..self.config.iterations {
            watchdog
                .run(work())
                .await
                .map_err(|e| BenchError::Work {
                    iteration: i,
                    source: e.into(),
                })?;

            if i > 0 && i % self.config.log_every == 0 {
                self.log_progress(global, &mem, i);
            }
        }

        let elapsed = phase.end();
        global.log(&format!("--done testing {kind} based--"));

        if !timers.settle(1_000).await {
            tracing::warn!(pending = timers.pending(), "timers still pending after phase");
        }
        let stats = timers.stats();
        tracing::debug!(
            variant = %kind,
            teardowns = watchdog.teardowns(),
            ?stats,
            "phase timer stats"
        );

        Ok(PhaseReport {
            kind,
            iterations: self.config.iterations,
            elapsed,
            warnings_fired: watchdog.warnings_fired(),
            timers: stats,
        })
    }

    fn log_progress(&self, global: &Stopwatch, mem: &MemoryBaseline, iteration: u64) {
        let count = group_thousands(iteration);
        let change = if self.config.log_memory {
            mem.change()
        } else {
            None
        };
        match change {
            Some(change) => global.log(&format!(
                "{}, Iteration: {count}",
                memory::format_change(change)
            )),
            None => global.log(&format!("Iteration: {count}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingCollector(AtomicU32);

    impl Collector for CountingCollector {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn collect(&self) -> Result<bool, CollectError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    struct MissingCollector;

    impl Collector for MissingCollector {
        fn name(&self) -> &'static str {
            "missing"
        }

        fn collect(&self) -> Result<bool, CollectError> {
            Err(CollectError {
                collector: "missing",
                reason: "not built in",
            })
        }
    }

    fn small_config() -> BenchConfig {
        BenchConfig {
            iterations: 10,
            log_every: 3,
            work_millis: 1,
            warning_thresholds_secs: vec![1.0, 5.0],
            spin_up_millis: 0,
            ..Default::default()
        }
    }

    fn iteration_lines(lines: &[String]) -> Vec<String> {
        lines
            .iter()
            .filter(|l| l.contains("Iteration:"))
            .cloned()
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_both_phases_in_order() {
        let config = small_config();
        let collector = CountingCollector(AtomicU32::new(0));
        let sink = LineSink::capture();

        let report = Bench::new(&config, &collector, sink.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.phases.len(), 2);
        assert_eq!(report.phases[0].kind, WatchdogKind::Callback);
        assert_eq!(report.phases[1].kind, WatchdogKind::Signal);
        for phase in &report.phases {
            assert_eq!(phase.iterations, 10);
            assert_eq!(phase.warnings_fired, 0);
            assert_eq!(phase.timers.scheduled, 20);
            assert_eq!(phase.timers.pending, 0);
            assert!(phase.elapsed >= Duration::from_millis(10));
        }
        assert_eq!(collector.0.load(Ordering::SeqCst), 2);
        assert!(report.total >= report.phases[0].elapsed + report.phases[1].elapsed);

        let lines = sink.lines();
        assert!(lines[0].starts_with("GLOBAL: "));
        assert!(lines[0].ends_with(" testing callback based"));
        assert!(lines.iter().any(|l| l.starts_with("wat-callback: ")));
        assert!(lines.iter().any(|l| l.ends_with("--done testing callback based--")));
        assert!(lines.iter().any(|l| l.starts_with("wat-signal: ")));
        assert!(lines.iter().any(|l| l.ends_with("--done testing signal based--")));
        let last = lines.last().unwrap();
        assert!(last.starts_with("GLOBAL: ") && !last.contains("based"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_cadence() {
        let config = BenchConfig {
            variants: vec![WatchdogKind::Signal],
            ..small_config()
        };
        let collector = CountingCollector(AtomicU32::new(0));
        let sink = LineSink::capture();

        Bench::new(&config, &collector, sink.clone())
            .run()
            .await
            .unwrap();

        let progress = iteration_lines(&sink.lines());
        assert_eq!(progress.len(), 3);
        assert!(progress[0].ends_with("Iteration: 3"));
        assert!(progress[1].ends_with("Iteration: 6"));
        assert!(progress[2].ends_with("Iteration: 9"));
        assert!(progress.iter().all(|l| l.starts_with("GLOBAL: ")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_uses_thousands_separator() {
        let config = BenchConfig {
            iterations: 2_001,
            log_every: 2_000,
            variants: vec![WatchdogKind::Callback],
            warning_thresholds_secs: vec![],
            ..small_config()
        };
        let collector = CountingCollector(AtomicU32::new(0));
        let sink = LineSink::capture();

        Bench::new(&config, &collector, sink.clone())
            .run_with(|| async { Ok::<(), WorkError>(()) })
            .await
            .unwrap();

        let progress = iteration_lines(&sink.lines());
        assert_eq!(progress.len(), 1);
        assert!(progress[0].ends_with("Iteration: 2,000"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_required_collector_is_fatal() {
        let config = small_config();
        let sink = LineSink::capture();
        let calls = AtomicU32::new(0);

        let err = Bench::new(&config, &MissingCollector, sink.clone())
            .run_with(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), WorkError>(()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BenchError::Collect(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(iteration_lines(&sink.lines()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_optional_collector_continues() {
        let config = BenchConfig {
            require_collection: false,
            variants: vec![WatchdogKind::Callback],
            ..small_config()
        };
        let report = Bench::new(&config, &MissingCollector, LineSink::capture())
            .run()
            .await
            .unwrap();
        assert_eq!(report.phases[0].iterations, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_failure_stops_run() {
        let config = small_config();
        let collector = CountingCollector(AtomicU32::new(0));
        let calls = AtomicU32::new(0);

        let err = Bench::new(&config, &collector, LineSink::capture())
            .run_with(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    if n == 4 {
                        Err("pipe closed")
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap_err();

        match err {
            BenchError::Work { iteration, source } => {
                assert_eq!(iteration, 4);
                assert_eq!(source.to_string(), "pipe closed");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // Only the first phase started.
        assert_eq!(collector.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_work_fires_warnings() {
        let config = BenchConfig {
            iterations: 2,
            work_millis: 1_500,
            warning_thresholds_secs: vec![1.0, 5.0],
            ..small_config()
        };
        let collector = CountingCollector(AtomicU32::new(0));

        let report = Bench::new(&config, &collector, LineSink::capture())
            .run()
            .await
            .unwrap();

        for phase in &report.phases {
            assert_eq!(phase.warnings_fired, 2, "{}", phase.kind);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spin_up_delays_start() {
        let config = BenchConfig {
            iterations: 1,
            spin_up_millis: 1_000,
            variants: vec![WatchdogKind::Callback],
            ..small_config()
        };
        let collector = CountingCollector(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let report = Bench::new(&config, &collector, LineSink::capture())
            .run()
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(report.total < Duration::from_secs(1));
    }

    #[test]
    fn test_bench_error_display() {
        let err = BenchError::Work {
            iteration: 12,
            source: "boom".into(),
        };
        assert_eq!(err.to_string(), "unit of work failed at iteration 12: boom");

        let err: BenchError = CollectError {
            collector: "malloc_trim",
            reason: "nope",
        }
        .into();
        assert!(err.to_string().contains("malloc_trim"));
    }
}
