//! Nested timeout hierarchy and dynamic timeout calculation.
//!
//! Every tool has four nested deadlines. The endpoint deadline bounds the
//! whole request, the queue deadline bounds time spent waiting for a worker,
//! the tool deadline bounds one handler invocation, and the instance deadline
//! bounds the backend's own execution. Inner deadlines must expire strictly
//! before outer ones so that no work outlives the request that started it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Table key used for tools without their own entry.
pub const DEFAULT_TIMEOUT_KEY: &str = "default";

const LIMIT_THRESHOLD: u64 = 1000;
const FIELD_COUNT_THRESHOLD: usize = 10;
const LIMIT_MULTIPLIER: f64 = 1.5;
const SEARCH_MULTIPLIER: f64 = 1.3;
const FIELD_COUNT_MULTIPLIER: f64 = 1.2;
const TRAVERSAL_MULTIPLIER: f64 = 2.0;
const MAX_MULTIPLIER: f64 = 3.0;

/// Nested deadlines for one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfiguration {
    /// Deadline for the whole inbound request.
    #[serde(with = "duration_secs")]
    pub endpoint_timeout: Duration,
    /// Deadline for waiting in the background queue.
    #[serde(with = "duration_secs")]
    pub queue_timeout: Duration,
    /// Deadline for one handler invocation.
    #[serde(with = "duration_secs")]
    pub tool_timeout: Duration,
    /// Deadline passed to the backend for its own execution.
    #[serde(with = "duration_secs")]
    pub instance_timeout: Duration,
}

impl TimeoutConfiguration {
    /// Creates a configuration from whole seconds.
    #[must_use]
    pub const fn from_secs(endpoint: u64, queue: u64, tool: u64, instance: u64) -> Self {
        Self {
            endpoint_timeout: Duration::from_secs(endpoint),
            queue_timeout: Duration::from_secs(queue),
            tool_timeout: Duration::from_secs(tool),
            instance_timeout: Duration::from_secs(instance),
        }
    }

    /// Returns whether `endpoint > queue > tool > instance` holds strictly.
    #[must_use]
    pub fn is_strictly_nested(&self) -> bool {
        self.endpoint_timeout > self.queue_timeout
            && self.queue_timeout > self.tool_timeout
            && self.tool_timeout > self.instance_timeout
    }
}

/// Kind of operation used to pick a base timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// A caller-written graph query.
    DatabaseQuery,
    /// A schema lookup.
    SchemaQuery,
    /// A graph information lookup.
    InfoQuery,
    /// Anything else.
    Other,
}

impl OperationType {
    /// Parses an operation type; unrecognised names map to [`Self::Other`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "database_query" => Self::DatabaseQuery,
            "schema_query" => Self::SchemaQuery,
            "info_query" => Self::InfoQuery,
            _ => Self::Other,
        }
    }

    /// Returns the tool whose endpoint timeout is the base for this type.
    #[must_use]
    pub const fn representative_tool(self) -> &'static str {
        match self {
            Self::DatabaseQuery => "read-graph-cypher",
            Self::SchemaQuery => "get-graph-schema",
            Self::InfoQuery => "get-graph-info",
            Self::Other => DEFAULT_TIMEOUT_KEY,
        }
    }
}

/// Call features that scale the base timeout up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityFactors {
    /// Requested row count.
    pub limit: Option<u64>,
    /// The call contains a search-like predicate.
    pub has_search: bool,
    /// Number of fields projected.
    pub field_count: Option<usize>,
    /// The call contains a variable-length traversal.
    pub has_unbounded_traversal: bool,
}

impl ComplexityFactors {
    /// Sets the requested row count.
    #[must_use]
    pub const fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Marks the call as containing a search-like predicate.
    #[must_use]
    pub const fn with_search(mut self, has_search: bool) -> Self {
        self.has_search = has_search;
        self
    }

    /// Sets the number of projected fields.
    #[must_use]
    pub const fn with_field_count(mut self, field_count: usize) -> Self {
        self.field_count = Some(field_count);
        self
    }

    /// Marks the call as containing a variable-length traversal.
    #[must_use]
    pub const fn with_unbounded_traversal(mut self, has_traversal: bool) -> Self {
        self.has_unbounded_traversal = has_traversal;
        self
    }

    /// Returns the combined multiplier, capped at 3.0.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "timeout multipliers are fractional by definition"
    )]
    pub fn multiplier(&self) -> f64 {
        let mut multiplier = 1.0;
        if self.limit.is_some_and(|limit| limit > LIMIT_THRESHOLD) {
            multiplier *= LIMIT_MULTIPLIER;
        }
        if self.has_search {
            multiplier *= SEARCH_MULTIPLIER;
        }
        if self
            .field_count
            .is_some_and(|count| count > FIELD_COUNT_THRESHOLD)
        {
            multiplier *= FIELD_COUNT_MULTIPLIER;
        }
        if self.has_unbounded_traversal {
            multiplier *= TRAVERSAL_MULTIPLIER;
        }
        multiplier.min(MAX_MULTIPLIER)
    }
}

/// Per-tool table of nested timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutCoordinator {
    table: HashMap<String, TimeoutConfiguration>,
    default: TimeoutConfiguration,
}

impl TimeoutCoordinator {
    /// Creates a coordinator with the built-in timeout table.
    #[must_use]
    pub fn new() -> Self {
        let table = [
            ("read-graph-cypher", TimeoutConfiguration::from_secs(30, 25, 20, 15)),
            ("get-graph-schema", TimeoutConfiguration::from_secs(20, 15, 10, 8)),
            ("get-graph-info", TimeoutConfiguration::from_secs(15, 12, 10, 8)),
            ("get-graph-description", TimeoutConfiguration::from_secs(20, 15, 10, 8)),
        ]
        .into_iter()
        .map(|(name, config)| (name.to_owned(), config))
        .collect();

        Self {
            table,
            default: TimeoutConfiguration::from_secs(30, 25, 20, 15),
        }
    }

    /// Creates a coordinator from the built-in table merged with overrides.
    ///
    /// An override keyed [`DEFAULT_TIMEOUT_KEY`] replaces the default entry.
    /// Entries that break the strict nesting are kept but logged.
    #[must_use]
    pub fn with_overrides<S: std::hash::BuildHasher>(
        overrides: &HashMap<String, TimeoutConfiguration, S>,
    ) -> Self {
        let mut coordinator = Self::new();
        for (name, config) in overrides {
            if name == DEFAULT_TIMEOUT_KEY {
                coordinator.default = *config;
            } else {
                coordinator.table.insert(name.clone(), *config);
            }
        }

        for name in coordinator.configured_tools() {
            if !coordinator.validate_timeout_hierarchy(&name) {
                tracing::warn!(
                    tool = %name,
                    "timeout hierarchy is not strictly nested (endpoint > queue > tool > instance)"
                );
            }
        }
        coordinator
    }

    /// Returns the configuration for a tool, falling back to the default.
    #[must_use]
    pub fn config_for(&self, tool_name: &str) -> &TimeoutConfiguration {
        self.table.get(tool_name).unwrap_or(&self.default)
    }

    /// Returns the default configuration.
    #[must_use]
    pub const fn default_config(&self) -> &TimeoutConfiguration {
        &self.default
    }

    /// Returns every configured tool name, including [`DEFAULT_TIMEOUT_KEY`].
    #[must_use]
    pub fn configured_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.keys().cloned().collect();
        names.push(DEFAULT_TIMEOUT_KEY.to_owned());
        names.sort();
        names
    }

    /// Returns whether the entry used for `tool_name` is strictly nested.
    ///
    /// Callers should log a `false` result rather than abort.
    #[must_use]
    pub fn validate_timeout_hierarchy(&self, tool_name: &str) -> bool {
        self.config_for(tool_name).is_strictly_nested()
    }

    /// Returns the tool-level timeout for a tool.
    #[must_use]
    pub fn tool_timeout(&self, tool_name: &str) -> Duration {
        self.config_for(tool_name).tool_timeout
    }

    /// Scales a representative endpoint timeout by call complexity.
    ///
    /// The base is the endpoint timeout of the tool that represents
    /// `operation_type`. Factors compose multiplicatively and the total
    /// multiplier never exceeds 3.0.
    #[must_use]
    pub fn calculate_timeout(
        &self,
        operation_type: OperationType,
        factors: &ComplexityFactors,
    ) -> Duration {
        let base = self
            .config_for(operation_type.representative_tool())
            .endpoint_timeout;
        base.mul_f64(factors.multiplier())
    }
}

impl Default for TimeoutCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::DatabaseQuery => "database_query",
            Self::SchemaQuery => "schema_query",
            Self::InfoQuery => "info_query",
            Self::Other => "other",
        })
    }
}

/// Serde helpers for durations written as (fractional) seconds.
pub(crate) mod duration_secs {
    use super::{Deserialize, Deserializer, Duration, Serializer};
    use serde::de::Error as _;

    pub(crate) fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}

/// Serde helpers for optional durations written as (fractional) seconds.
pub(crate) mod option_duration_secs {
    use super::{Deserialize, Deserializer, Duration, Serializer};
    use serde::de::Error as _;

    pub(crate) fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(value) => serializer.serialize_some(&value.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|seconds| Duration::try_from_secs_f64(seconds).map_err(D::Error::custom))
            .transpose()
    }
}
