//! Engine configuration.

use crate::errors::{BuildError, RowflowError};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Default channel capacity in rows.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;
/// Default wait between cancellation checks, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
/// Default number of rows between progress log lines.
pub const DEFAULT_FEEDBACK_INTERVAL: u64 = 50_000;
/// Default rows read from one input before rotating to the next.
pub const DEFAULT_ROWS_PER_INPUT_BLOCK: usize = 500;

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of every channel without a per-hop override.
    pub channel_capacity: usize,
    /// Upper bound on how long a blocked node waits before re-checking
    /// cancellation.
    pub poll_interval_ms: u64,
    /// Rows between progress log lines. Zero disables them.
    pub feedback_interval: u64,
    /// Rows read from one input before rotating to the next.
    pub rows_per_input_block: usize,
    /// Re-check every row read from an input against the input shape.
    /// Rows put on outputs are always checked.
    pub safe_mode: bool,
    /// Prefix of node thread names.
    pub thread_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            feedback_interval: DEFAULT_FEEDBACK_INTERVAL,
            rows_per_input_block: DEFAULT_ROWS_PER_INPUT_BLOCK,
            safe_mode: false,
            thread_name_prefix: "rowflow-".to_string(),
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default channel capacity.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the feedback interval.
    #[must_use]
    pub fn with_feedback_interval(mut self, rows: u64) -> Self {
        self.feedback_interval = rows;
        self
    }

    /// Sets the input block size.
    #[must_use]
    pub fn with_rows_per_input_block(mut self, rows: usize) -> Self {
        self.rows_per_input_block = rows;
        self
    }

    /// Enables type checks on rows read from inputs.
    #[must_use]
    pub fn with_safe_mode(mut self, enabled: bool) -> Self {
        self.safe_mode = enabled;
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// The poll interval as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The default capacity, checked.
    pub fn capacity(&self) -> Result<NonZeroUsize, BuildError> {
        NonZeroUsize::new(self.channel_capacity).ok_or_else(|| {
            invalid("channel_capacity", "Channel capacity must be at least 1")
        })
    }

    /// Checks every setting.
    pub fn validate(&self) -> Result<(), BuildError> {
        self.capacity()?;
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "Poll interval must be at least 1 ms"));
        }
        if self.rows_per_input_block == 0 {
            return Err(invalid(
                "rows_per_input_block",
                "Input block size must be at least 1 row",
            ));
        }
        Ok(())
    }

    /// Reads overrides from `ROWFLOW_*` environment variables on top of the
    /// defaults.
    ///
    /// Recognized: `ROWFLOW_CHANNEL_CAPACITY`, `ROWFLOW_POLL_INTERVAL_MS`,
    /// `ROWFLOW_FEEDBACK_INTERVAL`, `ROWFLOW_ROWS_PER_INPUT_BLOCK`,
    /// `ROWFLOW_SAFE_MODE`, `ROWFLOW_THREAD_NAME_PREFIX`.
    pub fn from_env() -> Result<Self, RowflowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RowflowError> {
        let mut config = Self::default();
        if let Some(v) = lookup("ROWFLOW_CHANNEL_CAPACITY") {
            config.channel_capacity = parse("ROWFLOW_CHANNEL_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("ROWFLOW_POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse("ROWFLOW_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("ROWFLOW_FEEDBACK_INTERVAL") {
            config.feedback_interval = parse("ROWFLOW_FEEDBACK_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("ROWFLOW_ROWS_PER_INPUT_BLOCK") {
            config.rows_per_input_block = parse("ROWFLOW_ROWS_PER_INPUT_BLOCK", &v)?;
        }
        if let Some(v) = lookup("ROWFLOW_SAFE_MODE") {
            config.safe_mode = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("ROWFLOW_THREAD_NAME_PREFIX") {
            config.thread_name_prefix = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, RowflowError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RowflowError::Config(format!("{key}={value:?}: {e}")))
}

fn invalid(setting: &str, message: &str) -> BuildError {
    BuildError::coded("CONFIG-INVALID", message).detail("setting", setting)
}
