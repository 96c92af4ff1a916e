//! Configuration for tool call dispatch.

use crate::tool_dispatch::domain::{
    LoadThresholds, TimeoutConfiguration, TimeoutCoordinator, duration_secs,
    option_duration_secs,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Absolute ceiling for caller-supplied tool timeout overrides.
pub const MAX_TIMEOUT_OVERRIDE: Duration = Duration::from_secs(300);

/// Dispatch configuration.
///
/// All fields have defaults, so a partial document deserialises into a
/// complete configuration.
///
/// # Examples
///
/// ```
/// use toolcall_dispatch::tool_dispatch::config::DispatchConfig;
///
/// let config = DispatchConfig::default();
/// assert_eq!(config.load_thresholds.queue_size, 10);
///
/// let strict = DispatchConfig::strict();
/// assert!(strict.load_thresholds.queue_size < config.load_thresholds.queue_size);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Load levels above which calls are queued.
    pub load_thresholds: LoadThresholds,
    /// Rows per `query_chunk` event.
    pub chunk_size: usize,
    /// A `progress` event is emitted after this many query chunks.
    pub progress_every_chunks: usize,
    /// Ceiling applied to caller-supplied tool timeout overrides.
    #[serde(with = "duration_secs")]
    pub max_timeout_override: Duration,
    /// Interval between queue status polls for monitored queues.
    #[serde(with = "duration_secs")]
    pub monitor_poll_interval: Duration,
    /// Prefix of the monitor URL returned for queued operations.
    pub monitor_base_url: String,
    /// Delay between description sections; `None` disables pacing.
    #[serde(with = "option_duration_secs")]
    pub description_pacing: Option<Duration>,
    /// Per-tool timeout overrides merged over the built-in table.
    pub tool_timeouts: HashMap<String, TimeoutConfiguration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            load_thresholds: LoadThresholds::default(),
            chunk_size: 100,
            progress_every_chunks: 5,
            max_timeout_override: MAX_TIMEOUT_OVERRIDE,
            monitor_poll_interval: Duration::from_millis(500),
            monitor_base_url: "/v1/operations".to_owned(),
            description_pacing: None,
            tool_timeouts: HashMap::new(),
        }
    }
}

impl DispatchConfig {
    /// Creates a configuration that queues earlier and streams smaller
    /// chunks.
    ///
    /// Useful for resource-constrained deployments.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            load_thresholds: LoadThresholds {
                queue_size: 5,
                running_queries: 2,
            },
            chunk_size: 50,
            max_timeout_override: Duration::from_secs(120),
            ..Self::default()
        }
    }

    /// Creates a configuration that rarely queues.
    ///
    /// Useful for single-tenant or development deployments.
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            load_thresholds: LoadThresholds {
                queue_size: 100,
                running_queries: 50,
            },
            ..Self::default()
        }
    }

    /// Sets the load thresholds.
    #[must_use]
    pub const fn with_load_thresholds(mut self, thresholds: LoadThresholds) -> Self {
        self.load_thresholds = thresholds;
        self
    }

    /// Sets the number of rows per query chunk; zero is treated as one.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets the queue monitor poll interval.
    #[must_use]
    pub const fn with_monitor_poll_interval(mut self, interval: Duration) -> Self {
        self.monitor_poll_interval = interval;
        self
    }

    /// Sets the delay between description sections.
    #[must_use]
    pub const fn with_description_pacing(mut self, pacing: Option<Duration>) -> Self {
        self.description_pacing = pacing;
        self
    }

    /// Adds a per-tool timeout override.
    #[must_use]
    pub fn with_tool_timeout(
        mut self,
        tool_name: impl Into<String>,
        timeouts: TimeoutConfiguration,
    ) -> Self {
        self.tool_timeouts.insert(tool_name.into(), timeouts);
        self
    }

    /// Builds a timeout coordinator from the built-in table and overrides.
    #[must_use]
    pub fn timeout_coordinator(&self) -> TimeoutCoordinator {
        TimeoutCoordinator::with_overrides(&self.tool_timeouts)
    }

    /// Returns the effective chunk size, never zero.
    #[must_use]
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    /// Returns the effective progress cadence, never zero.
    #[must_use]
    pub fn effective_progress_every(&self) -> usize {
        self.progress_every_chunks.max(1)
    }
}
