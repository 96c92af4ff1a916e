//! Error types for tool dispatch domain validation and parsing.

use thiserror::Error;

/// Errors returned while constructing tool dispatch domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolDispatchDomainError {
    /// The tool name is empty after trimming.
    #[error("tool name must not be empty")]
    EmptyToolName,

    /// The graph identifier is empty after trimming.
    #[error("graph identifier must not be empty")]
    EmptyGraphId,

    /// The graph identifier contains characters outside `[A-Za-z0-9_-]`.
    #[error(
        "graph identifier '{0}' contains invalid characters (only alphanumeric, '-' and '_' allowed)"
    )]
    InvalidGraphId(String),

    /// The graph identifier exceeds the 64-character limit.
    #[error("graph identifier exceeds 64 character limit: {0}")]
    GraphIdTooLong(String),

    /// Transitioning between two handler lifecycle states is invalid.
    #[error("invalid handler lifecycle transition: {from} -> {to}")]
    InvalidLifecycleTransition {
        /// Current lifecycle state.
        from: String,
        /// Requested target lifecycle state.
        to: String,
    },
}

/// Error returned while parsing an execution strategy name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown execution strategy: {0}")]
pub struct ParseExecutionStrategyError(pub String);

/// Error returned while parsing a caller-supplied response format.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown response format '{0}' (expected json, sse or ndjson)")]
pub struct ParseFormatOverrideError(pub String);
