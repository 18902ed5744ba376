use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Every packet and state transition.
    Trace,
    /// Per-packet summaries.
    Debug,
    /// Session start/finish (default).
    #[default]
    Info,
    /// Tolerated deviations only.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// Name as written in the config file.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// The two host settings the reproducer consumes.
///
/// `generate = true` records a new reproducer; `generate = false` with a
/// `path` replays the reproducer found there; neither disables it.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReproducerSettings {
    /// Record a reproducer for this run.
    #[serde(default)]
    pub generate: bool,
    /// Reproducer root directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Allow capturing into a non-empty directory, wiping it first.
    #[serde(default)]
    pub force: bool,
}

/// Logging configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log verbosity level.
    #[serde(default)]
    pub level: LogLevel,
    /// Write logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Diagnostics history kept per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of recent packets remembered for failure dumps.
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

fn default_history_capacity() -> usize {
    64
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

/// Top-level gdbtape configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Capture/replay settings.
    #[serde(default)]
    pub reproducer: ReproducerSettings,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
    /// Packet history settings.
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Values given on the command line; `Some` wins over the file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Overrides {
    pub generate: Option<bool>,
    pub path: Option<PathBuf>,
    pub force: Option<bool>,
    pub log_level: Option<LogLevel>,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Apply command-line overrides on top of file values.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(generate) = overrides.generate {
            self.reproducer.generate = generate;
        }
        if let Some(path) = &overrides.path {
            self.reproducer.path = Some(path.clone());
        }
        if let Some(force) = overrides.force {
            self.reproducer.force = force;
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
        if let Some(file) = &overrides.log_file {
            self.log.file = Some(file.clone());
        }
    }
}
