mod bench;
mod collect;
mod config;
mod memory;
mod stopwatch;
mod timers;
mod watchdog;

use clap::Parser;
use config::BenchConfig;
use std::path::PathBuf;
use watchdog::WatchdogKind;

/// Micro-benchmark of timeout-warning watchdogs: callback timers cleared one
/// by one versus sleep tasks sharing a single cancellation signal.
#[derive(Parser, Debug)]
#[command(name = "watchdog-bench", version, about)]
pub struct Cli {
    /// Iterations per phase (default: from config)
    #[arg(value_name = "ITERATIONS")]
    iterations: Option<u64>,

    /// Config file path
    #[arg(short, long, default_value = "bench.toml")]
    config: PathBuf,

    /// Print a progress line every N iterations
    #[arg(long)]
    log_every: Option<u64>,

    /// Duration of each unit of work in milliseconds
    #[arg(long)]
    work_millis: Option<u64>,

    /// Warning thresholds in seconds, comma separated
    #[arg(long, value_delimiter = ',')]
    thresholds: Option<Vec<f64>>,

    /// Variant to run; repeat to run several in order
    #[arg(long = "variant", value_enum)]
    variants: Vec<WatchdogKind>,

    /// Sleep before the first phase, in milliseconds
    #[arg(long)]
    spin_up_millis: Option<u64>,

    /// Include resident memory change in progress lines
    #[arg(long)]
    log_memory: bool,

    /// Continue when forced collection is unavailable
    #[arg(long)]
    no_require_collection: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (collection, timer stats)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded config.
    fn apply(&self, config: &mut BenchConfig) {
        if let Some(n) = self.iterations {
            config.iterations = n;
        }
        if let Some(n) = self.log_every {
            config.log_every = n;
        }
        if let Some(ms) = self.work_millis {
            config.work_millis = ms;
        }
        if let Some(thresholds) = &self.thresholds {
            config.warning_thresholds_secs = thresholds.clone();
        }
        if !self.variants.is_empty() {
            config.variants = self.variants.clone();
        }
        if let Some(ms) = self.spin_up_millis {
            config.spin_up_millis = ms;
        }
        if self.log_memory {
            config.log_memory = true;
        }
        if self.no_require_collection {
            config.require_collection = false;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "watchdog_bench=debug"
    } else {
        "watchdog_bench=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match BenchConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    cli.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    if cli.dry_run {
        match toml::to_string_pretty(&config) {
            Ok(resolved) => print!("{resolved}"),
            Err(e) => {
                eprintln!("Error: failed to render config: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let collector = collect::HeapTrimCollector;
    let runner = bench::Bench::new(&config, &collector, stopwatch::LineSink::stdout());
    match runner.run().await {
        Ok(report) => {
            for phase in &report.phases {
                tracing::info!(
                    variant = %phase.kind,
                    iterations = phase.iterations,
                    elapsed = %stopwatch::format_elapsed(phase.elapsed),
                    warnings = phase.warnings_fired,
                    "phase finished"
                );
                tracing::debug!(
                    variant = %phase.kind,
                    timers = ?phase.timers,
                    "phase timer stats"
                );
            }
            tracing::info!(
                total = %stopwatch::format_elapsed(report.total),
                phases = report.phases.len(),
                "benchmark finished"
            );
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
