//! Response-delivery strategy selection.

use super::{
    ClientProfile, GraphId, ParseExecutionStrategyError, ParseFormatOverrideError, ResultSize,
    ToolCall, ToolCallAnalysis, ToolCategory,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Timeout applied to strategy names that are not recognised.
pub const FALLBACK_STRATEGY_TIMEOUT: Duration = Duration::from_secs(60);

/// Response-delivery mode chosen for one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStrategy {
    /// Run now and return a small JSON body.
    JsonImmediate,
    /// Run to completion and return a buffered JSON body.
    JsonComplete,
    /// Stream raw events as newline-delimited JSON.
    NdjsonStreaming,
    /// Stream raw events as Server-Sent Events.
    SseStreaming,
    /// Stream events with progress as Server-Sent Events.
    SseProgress,
    /// Enqueue and stream queue status to the caller.
    QueueWithMonitoring,
    /// Enqueue and return a monitor URL.
    QueueSimple,
    /// Serve a generic cached result.
    Cached,
    /// Stream internally; aggregate for MCP clients, NDJSON for others.
    StreamAggregated,
    /// Serve a cached schema result.
    SchemaCached,
    /// Serve a cached info result.
    InfoCached,
}

impl ExecutionStrategy {
    /// Every strategy, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::JsonImmediate,
        Self::JsonComplete,
        Self::NdjsonStreaming,
        Self::SseStreaming,
        Self::SseProgress,
        Self::QueueWithMonitoring,
        Self::QueueSimple,
        Self::Cached,
        Self::StreamAggregated,
        Self::SchemaCached,
        Self::InfoCached,
    ];

    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JsonImmediate => "JSON_IMMEDIATE",
            Self::JsonComplete => "JSON_COMPLETE",
            Self::NdjsonStreaming => "NDJSON_STREAMING",
            Self::SseStreaming => "SSE_STREAMING",
            Self::SseProgress => "SSE_PROGRESS",
            Self::QueueWithMonitoring => "QUEUE_WITH_MONITORING",
            Self::QueueSimple => "QUEUE_SIMPLE",
            Self::Cached => "CACHED",
            Self::StreamAggregated => "STREAM_AGGREGATED",
            Self::SchemaCached => "SCHEMA_CACHED",
            Self::InfoCached => "INFO_CACHED",
        }
    }

    /// Returns the response timeout for this strategy.
    #[must_use]
    pub const fn timeout(self) -> Duration {
        match self {
            Self::JsonImmediate => Duration::from_secs(30),
            Self::JsonComplete => Duration::from_secs(120),
            Self::NdjsonStreaming
            | Self::SseStreaming
            | Self::SseProgress
            | Self::StreamAggregated => Duration::from_secs(300),
            Self::QueueWithMonitoring | Self::QueueSimple => Duration::from_secs(600),
            Self::Cached | Self::SchemaCached | Self::InfoCached => Duration::from_secs(5),
        }
    }

    /// Returns whether the strategy hands the call to the job queue.
    #[must_use]
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::QueueWithMonitoring | Self::QueueSimple)
    }

    /// Returns whether the strategy serves from the result cache.
    #[must_use]
    pub const fn is_cached(self) -> bool {
        matches!(self, Self::Cached | Self::SchemaCached | Self::InfoCached)
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ExecutionStrategy {
    type Error = ParseExecutionStrategyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| ParseExecutionStrategyError(value.to_owned()))
    }
}

/// Returns the timeout for a strategy given by name, or 60 seconds when the
/// name is not recognised.
#[must_use]
pub fn timeout_for_strategy_name(name: &str) -> Duration {
    ExecutionStrategy::try_from(name).map_or(FALLBACK_STRATEGY_TIMEOUT, ExecutionStrategy::timeout)
}

/// Explicit response format requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatOverride {
    /// Buffered JSON.
    Json,
    /// Server-Sent Events with progress.
    Sse,
    /// Newline-delimited JSON.
    Ndjson,
}

impl FormatOverride {
    /// Returns the strategy this format forces.
    #[must_use]
    pub const fn strategy(self) -> ExecutionStrategy {
        match self {
            Self::Json => ExecutionStrategy::JsonComplete,
            Self::Sse => ExecutionStrategy::SseProgress,
            Self::Ndjson => ExecutionStrategy::StreamAggregated,
        }
    }
}

impl TryFrom<&str> for FormatOverride {
    type Error = ParseFormatOverrideError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sse" => Ok(Self::Sse),
            "ndjson" => Ok(Self::Ndjson),
            _ => Err(ParseFormatOverrideError(value.to_owned())),
        }
    }
}

/// Point-in-time system load supplied with each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStateSnapshot {
    /// Number of operations waiting in the job queue.
    pub queue_size: usize,
    /// Number of queries currently executing.
    pub running_queries: usize,
    /// Whether the result cache is reachable.
    pub cache_available: bool,
}

impl SystemStateSnapshot {
    /// Creates a snapshot.
    #[must_use]
    pub const fn new(queue_size: usize, running_queries: usize, cache_available: bool) -> Self {
        Self {
            queue_size,
            running_queries,
            cache_available,
        }
    }
}

/// Load levels above which calls are queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadThresholds {
    /// Queue size strictly above which calls are queued.
    pub queue_size: usize,
    /// Running query count strictly above which calls are queued.
    pub running_queries: usize,
}

impl LoadThresholds {
    /// Returns whether the snapshot is above either threshold.
    #[must_use]
    pub const fn is_exceeded_by(&self, state: &SystemStateSnapshot) -> bool {
        state.queue_size > self.queue_size || state.running_queries > self.running_queries
    }
}

impl Default for LoadThresholds {
    fn default() -> Self {
        Self {
            queue_size: 10,
            running_queries: 5,
        }
    }
}

/// Caller-supplied query parameters that influence selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionOptions {
    /// Explicit response format.
    pub format: Option<FormatOverride>,
    /// Forces a buffered JSON response when no format is given.
    pub test_mode: bool,
}

/// Inputs to one strategy decision.
#[derive(Debug, Clone, Copy)]
pub struct StrategyInputs<'a> {
    /// The tool call being dispatched.
    pub tool_call: &'a ToolCall,
    /// Caller capabilities.
    pub client_profile: &'a ClientProfile,
    /// Current system load.
    pub system_state: SystemStateSnapshot,
    /// Target graph.
    pub graph_id: &'a GraphId,
    /// Caller subscription tier, if known.
    pub user_tier: Option<&'a str>,
    /// Query parameter overrides.
    pub options: SelectionOptions,
}

/// Outcome of a strategy decision with the analysis it was based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyDecision {
    /// Analysis of the tool call.
    pub analysis: ToolCallAnalysis,
    /// Chosen strategy.
    pub strategy: ExecutionStrategy,
}

/// Pure strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrategySelector {
    thresholds: LoadThresholds,
}

impl StrategySelector {
    /// Creates a selector with custom load thresholds.
    #[must_use]
    pub const fn new(thresholds: LoadThresholds) -> Self {
        Self { thresholds }
    }

    /// Selects the strategy for a tool call.
    #[must_use]
    pub fn select(&self, inputs: &StrategyInputs<'_>) -> ExecutionStrategy {
        self.decide(inputs).strategy
    }

    /// Analyses a tool call and selects its strategy.
    ///
    /// The first matching rule wins: cache, load, category. An explicit
    /// format then replaces the result, and test mode without a format forces
    /// buffered JSON unless the call was queued.
    #[must_use]
    pub fn decide(&self, inputs: &StrategyInputs<'_>) -> StrategyDecision {
        let analysis =
            ToolCallAnalysis::analyze(inputs.tool_call.name(), inputs.tool_call.arguments());
        let computed = self.computed_strategy(&analysis, inputs);

        let strategy = match inputs.options {
            SelectionOptions {
                format: Some(format),
                ..
            } => format.strategy(),
            SelectionOptions {
                format: None,
                test_mode: true,
            } if !computed.is_queued() => ExecutionStrategy::JsonComplete,
            _ => computed,
        };

        tracing::debug!(
            tool = %inputs.tool_call.name(),
            graph = %inputs.graph_id,
            tier = inputs.user_tier.unwrap_or("none"),
            category = %analysis.tool_category,
            size = %analysis.estimated_result_size,
            requires_streaming = analysis.requires_streaming,
            computed = %computed,
            strategy = %strategy,
            "selected execution strategy"
        );

        StrategyDecision { analysis, strategy }
    }

    fn computed_strategy(
        &self,
        analysis: &ToolCallAnalysis,
        inputs: &StrategyInputs<'_>,
    ) -> ExecutionStrategy {
        let client = inputs.client_profile;

        if analysis.is_cacheable && inputs.system_state.cache_available {
            return match analysis.tool_category {
                ToolCategory::Schema => ExecutionStrategy::SchemaCached,
                ToolCategory::Info => ExecutionStrategy::InfoCached,
                ToolCategory::Query | ToolCategory::Unknown => ExecutionStrategy::Cached,
            };
        }

        // Back-pressure outranks per-call latency, even for fast calls.
        if self.thresholds.is_exceeded_by(&inputs.system_state) {
            return if client.supports_sse {
                ExecutionStrategy::QueueWithMonitoring
            } else {
                ExecutionStrategy::QueueSimple
            };
        }

        category_strategy(analysis, client)
    }
}

type CategoryRule = fn(&ToolCallAnalysis, &ClientProfile) -> ExecutionStrategy;

const fn category_rule(category: ToolCategory) -> CategoryRule {
    match category {
        ToolCategory::Query => query_strategy,
        ToolCategory::Schema => schema_strategy,
        ToolCategory::Info => info_strategy,
        ToolCategory::Unknown => unknown_strategy,
    }
}

fn category_strategy(analysis: &ToolCallAnalysis, client: &ClientProfile) -> ExecutionStrategy {
    category_rule(analysis.tool_category)(analysis, client)
}

const fn query_strategy(analysis: &ToolCallAnalysis, client: &ClientProfile) -> ExecutionStrategy {
    match analysis.estimated_result_size {
        ResultSize::Small if !analysis.requires_streaming => ExecutionStrategy::JsonImmediate,
        ResultSize::Small => ExecutionStrategy::StreamAggregated,
        ResultSize::Medium if analysis.requires_streaming => ExecutionStrategy::StreamAggregated,
        ResultSize::Medium => ExecutionStrategy::JsonComplete,
        ResultSize::Large if client.is_mcp_client => ExecutionStrategy::StreamAggregated,
        ResultSize::Large => ExecutionStrategy::SseProgress,
    }
}

const fn schema_strategy(analysis: &ToolCallAnalysis, client: &ClientProfile) -> ExecutionStrategy {
    if analysis.supports_progress && client.supports_sse {
        ExecutionStrategy::SseProgress
    } else {
        ExecutionStrategy::JsonComplete
    }
}

const fn info_strategy(_: &ToolCallAnalysis, _: &ClientProfile) -> ExecutionStrategy {
    ExecutionStrategy::JsonImmediate
}

const fn unknown_strategy(_: &ToolCallAnalysis, _: &ClientProfile) -> ExecutionStrategy {
    ExecutionStrategy::JsonComplete
}
