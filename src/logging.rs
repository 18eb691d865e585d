//! Logging setup and pipeline metrics.
//!
//! The crate logs through the [`log`] facade with one target per component
//! (`safer_rawcap::buffer`, `safer_rawcap::receive`, ...). Nothing is
//! printed unless the application installs a logger; [`init`] installs
//! `env_logger` configured from a [`LoggingConfig`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::LoggingConfig;

/// Log level for safer-rawcap operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Trace-level logging (very verbose)
    Trace = 0,
    /// Debug-level logging
    Debug = 1,
    /// Info-level logging
    Info = 2,
    /// Warning-level logging
    Warn = 3,
    /// Error-level logging
    Error = 4,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// Install `env_logger` as the global logger.
///
/// The configured level applies to every target; `RUST_LOG` overrides it.
/// Returns `false` if logging is disabled in `config` or a logger was
/// already installed, which makes repeated calls harmless.
///
/// # Example
///
/// ```rust
/// use safer_rawcap::config::CaptureConfig;
/// use safer_rawcap::logging;
///
/// let config = CaptureConfig::development();
/// logging::init(&config.logging);
/// log::debug!(target: "demo", "logger ready");
/// ```
pub fn init(config: &LoggingConfig) -> bool {
    if !config.enabled {
        return false;
    }
    env_logger::Builder::new()
        .filter_level(config.level.into())
        .parse_default_env()
        .try_init()
        .is_ok()
}

/// Per-operation timings of a handle.
///
/// Collected only when [`LoggingConfig::metrics`] is set for the handle.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    /// Operation counts by type
    operation_counts: HashMap<&'static str, u64>,
    /// Total duration by operation type
    operation_durations: HashMap<&'static str, Duration>,
    /// Minimum duration by operation type
    min_durations: HashMap<&'static str, Duration>,
    /// Maximum duration by operation type
    max_durations: HashMap<&'static str, Duration>,
    /// Start time for metrics collection
    start_time: Instant,
}

impl PipelineMetrics {
    /// Empty metrics, collection starting now.
    pub fn new() -> Self {
        Self {
            operation_counts: HashMap::new(),
            operation_durations: HashMap::new(),
            min_durations: HashMap::new(),
            max_durations: HashMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Record one operation timing.
    pub fn record_operation(&mut self, operation: &'static str, duration: Duration) {
        *self.operation_counts.entry(operation).or_insert(0) += 1;
        *self
            .operation_durations
            .entry(operation)
            .or_insert(Duration::ZERO) += duration;

        let min = self.min_durations.entry(operation).or_insert(duration);
        if duration < *min {
            *min = duration;
        }
        let max = self.max_durations.entry(operation).or_insert(duration);
        if duration > *max {
            *max = duration;
        }
    }

    /// Number of recorded `operation`s.
    pub fn count(&self, operation: &str) -> u64 {
        self.operation_counts.get(operation).copied().unwrap_or(0)
    }

    /// Mean duration of `operation`.
    pub fn average_duration(&self, operation: &str) -> Option<Duration> {
        let count = self.count(operation);
        if count == 0 {
            return None;
        }
        self.operation_durations
            .get(operation)
            .map(|total| *total / count as u32)
    }

    /// Fastest `operation`.
    pub fn min_duration(&self, operation: &str) -> Option<Duration> {
        self.min_durations.get(operation).copied()
    }

    /// Slowest `operation`.
    pub fn max_duration(&self, operation: &str) -> Option<Duration> {
        self.max_durations.get(operation).copied()
    }

    /// Recorded operation names, sorted.
    pub fn operation_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.operation_counts.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Operations recorded across all types.
    pub fn total_operations(&self) -> u64 {
        self.operation_counts.values().sum()
    }

    /// Time since collection started.
    pub fn collection_duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Drop everything and restart collection.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Human readable summary.
    pub fn generate_report(&self) -> String {
        let mut report = String::new();
        report.push_str("=== safer-rawcap pipeline metrics ===\n");
        report.push_str(&format!(
            "Collection Duration: {:?}\n",
            self.collection_duration()
        ));
        report.push_str(&format!(
            "Total Operations: {}\n\n",
            self.total_operations()
        ));

        for operation in self.operation_types() {
            report.push_str(&format!("Operation: {operation}\n"));
            report.push_str(&format!("  Count: {}\n", self.count(operation)));
            if let Some(avg) = self.average_duration(operation) {
                report.push_str(&format!("  Average Duration: {avg:?}\n"));
            }
            if let Some(min) = self.min_duration(operation) {
                report.push_str(&format!("  Min Duration: {min:?}\n"));
            }
            if let Some(max) = self.max_duration(operation) {
                report.push_str(&format!("  Max Duration: {max:?}\n"));
            }
            report.push('\n');
        }
        report
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
