//! Configuration types for a directory watch.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};

/// Default wait between two pump passes or two polling scans.
pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Default number of batches buffered between producer and consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Configuration for a watched directory tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Root of the watched tree.
    pub root: PathBuf,

    /// Regular expression searched in every absolute path. Empty ignores nothing.
    pub ignore: String,

    /// Which backend to use.
    pub backend: BackendPreference,

    /// Tick interval in milliseconds.
    pub tick_ms: u64,

    /// Batches buffered before the producer blocks.
    pub channel_capacity: usize,

    /// Whether to follow symbolic links while walking.
    pub follow_symlinks: bool,
}

impl WatchConfig {
    /// Create a new watch config.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ignore: String::new(),
            backend: BackendPreference::Auto,
            tick_ms: DEFAULT_TICK.as_millis() as u64,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            follow_symlinks: false,
        }
    }

    /// Set the ignore pattern.
    pub fn with_ignore(mut self, pattern: impl Into<String>) -> Self {
        self.ignore = pattern.into();
        self
    }

    /// Set the backend preference.
    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    /// Set the tick interval.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick_ms = tick.as_millis() as u64;
        self
    }

    /// Set the channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Enable following symbolic links.
    pub fn follow_symlinks(mut self) -> Self {
        self.follow_symlinks = true;
        self
    }

    /// The tick interval as a duration.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Reject values the producer loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            return Err(WatcherError::Config("tick must be at least 1ms".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(WatcherError::Config(
                "channel capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Which backend a watch should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Native notifications when available, polling otherwise.
    #[default]
    Auto,

    /// Native notifications only; setup failures are fatal.
    Native,

    /// Periodic scans only.
    Polling,
}

impl std::str::FromStr for BackendPreference {
    type Err = WatcherError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "polling" | "poll" => Ok(Self::Polling),
            other => Err(WatcherError::Config(format!("unknown backend: {other}"))),
        }
    }
}
