use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::watchdog::WatchdogKind;

/// Iterations per phase when nothing overrides it.
pub const ITERATIONS: u64 = 300_000;
/// Progress line cadence, in iterations.
pub const LOG_MEM_ITERATIONS: u64 = 30_000;
/// How long each unit of work sleeps, in milliseconds.
pub const ITERATIONS_MILLI: u64 = 1;
/// Warning thresholds armed around every unit of work, in seconds.
pub const TIMEOUT_WARNING_TIMES: [f64; 5] = [1.0, 5.0, 10.0, 30.0, 600.0];
/// Sleep before the first phase so the runtime is warm.
pub const SPIN_UP_MILLIS: u64 = 1_000;

/// Top-level configuration, optionally loaded from bench.toml.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BenchConfig {
    pub iterations: u64,
    pub log_every: u64,
    pub work_millis: u64,
    pub warning_thresholds_secs: Vec<f64>,
    pub spin_up_millis: u64,
    /// Phases to run, in order.
    pub variants: Vec<WatchdogKind>,
    pub log_memory: bool,
    /// Treat a missing forced-collection capability as fatal.
    pub require_collection: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            iterations: ITERATIONS,
            log_every: LOG_MEM_ITERATIONS,
            work_millis: ITERATIONS_MILLI,
            warning_thresholds_secs: TIMEOUT_WARNING_TIMES.to_vec(),
            spin_up_millis: SPIN_UP_MILLIS,
            variants: vec![WatchdogKind::Callback, WatchdogKind::Signal],
            log_memory: false,
            require_collection: true,
        }
    }
}

impl BenchConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let config: BenchConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(config)
    }

    /// Reject settings the driver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_every == 0 {
            return Err(ConfigError::Invalid(
                "log_every must be greater than 0".to_string(),
            ));
        }
        if self.variants.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one variant must be selected".to_string(),
            ));
        }
        for t in &self.warning_thresholds_secs {
            if !t.is_finite() || *t <= 0.0 || Duration::try_from_secs_f64(*t).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "warning threshold {t} must be a positive number of seconds"
                )));
            }
        }
        Ok(())
    }

    pub fn work_duration(&self) -> Duration {
        Duration::from_millis(self.work_millis)
    }

    pub fn spin_up(&self) -> Duration {
        Duration::from_millis(self.spin_up_millis)
    }

    /// Thresholds as durations, in configured order.
    pub fn thresholds(&self) -> Vec<Duration> {
        self.warning_thresholds_secs
            .iter()
            .map(|s| Duration::from_secs_f64(*s))
            .collect()
    }
}

/// Errors from loading or validating the config.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}
