//! Domain model for tool call dispatch.
//!
//! The dispatch domain classifies callers and tool calls, selects a response
//! strategy, models the nested timeout hierarchy, and defines the streaming
//! event protocol. Everything here is pure; infrastructure concerns remain
//! outside this boundary.

mod analysis;
mod client;
mod error;
mod event;
mod ids;
mod lifecycle;
mod strategy;
mod timeout;
mod tool;

pub use analysis::{ResultSize, ToolCallAnalysis};
pub use client::{
    ACCEPT_HEADER, ClientProfile, MCP_CLIENT_HEADER, NDJSON_MEDIA_TYPE, RequestHeaders,
    SSE_MEDIA_TYPE, USER_AGENT_HEADER,
};
pub use error::{ParseExecutionStrategyError, ParseFormatOverrideError, ToolDispatchDomainError};
pub use event::{SseFrame, StreamEvent, StreamEventKind};
pub use ids::{GraphId, HandlerId, OperationId};
pub use lifecycle::HandlerLifecycleState;
pub use strategy::{
    ExecutionStrategy, FALLBACK_STRATEGY_TIMEOUT, FormatOverride, LoadThresholds,
    SelectionOptions, StrategyDecision, StrategyInputs, StrategySelector, SystemStateSnapshot,
    timeout_for_strategy_name,
};
pub use timeout::{
    ComplexityFactors, DEFAULT_TIMEOUT_KEY, OperationType, TimeoutConfiguration,
    TimeoutCoordinator,
};
pub(crate) use timeout::{duration_secs, option_duration_secs};
pub use tool::{ToolCall, ToolCategory, ToolFailureKind, ToolName, ToolOutput};
