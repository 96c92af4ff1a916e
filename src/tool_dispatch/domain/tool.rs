//! Tool call value objects and classification.

use super::ToolDispatchDomainError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

/// Validated, non-empty tool name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolName(String);

impl ToolName {
    /// Creates a validated tool name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolDispatchDomainError::EmptyToolName`] when the name is
    /// blank.
    pub fn new(value: impl Into<String>) -> Result<Self, ToolDispatchDomainError> {
        let normalized = value.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(ToolDispatchDomainError::EmptyToolName);
        }
        Ok(Self(normalized))
    }

    /// Returns the tool name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the category this tool belongs to.
    #[must_use]
    pub fn category(&self) -> ToolCategory {
        ToolCategory::of(self.as_str())
    }
}

impl AsRef<str> for ToolName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Coarse classification of a tool by the kind of work it performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Executes a graph query written by the caller.
    Query,
    /// Returns graph schema metadata.
    Schema,
    /// Returns descriptive information about a graph.
    Info,
    /// Not a recognised tool.
    Unknown,
}

const QUERY_TOOLS: &[&str] = &[
    "read-graph-cypher",
    "read-neo4j-cypher",
    "execute-cypher-query",
];

const SCHEMA_TOOLS: &[&str] = &["get-graph-schema", "get-neo4j-schema"];

const INFO_TOOLS: &[&str] = &[
    "get-graph-info",
    "get-graph-description",
    "describe-graph-structure",
    "get-example-queries",
];

impl ToolCategory {
    /// Classifies a tool by name using the fixed membership sets.
    #[must_use]
    pub fn of(tool_name: &str) -> Self {
        if QUERY_TOOLS.contains(&tool_name) {
            Self::Query
        } else if SCHEMA_TOOLS.contains(&tool_name) {
            Self::Schema
        } else if INFO_TOOLS.contains(&tool_name) {
            Self::Info
        } else {
            Self::Unknown
        }
    }

    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Schema => "schema",
            Self::Info => "info",
            Self::Unknown => "unknown",
        }
    }

    /// Returns whether results in this category may be served from cache.
    #[must_use]
    pub const fn is_cacheable(self) -> bool {
        matches!(self, Self::Schema | Self::Info)
    }

    /// Returns whether tools in this category can report incremental progress.
    #[must_use]
    pub const fn supports_progress(self) -> bool {
        matches!(self, Self::Query | Self::Schema)
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A named tool invocation with its argument map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    name: ToolName,
    #[serde(default)]
    arguments: Map<String, Value>,
}

impl ToolCall {
    /// Creates a tool call.
    #[must_use]
    pub const fn new(name: ToolName, arguments: Map<String, Value>) -> Self {
        Self { name, arguments }
    }

    /// Creates a tool call from a raw name, validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ToolDispatchDomainError::EmptyToolName`] when the name is
    /// blank.
    pub fn named(
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Result<Self, ToolDispatchDomainError> {
        Ok(Self::new(ToolName::new(name)?, arguments))
    }

    /// Returns the tool name.
    #[must_use]
    pub const fn name(&self) -> &ToolName {
        &self.name
    }

    /// Returns the tool arguments.
    #[must_use]
    pub const fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }
}

/// Failure classes a tool invocation can report as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// The invocation exceeded its deadline.
    Timeout,
    /// The backend refused the call as too complex or otherwise constrained.
    ConstraintViolation,
    /// The backend reported a structured failure.
    BackendProtocol,
    /// Any other failure.
    Unexpected,
}

impl ToolFailureKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConstraintViolation => "constraint_violation",
            Self::BackendProtocol => "backend_protocol",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ToolFailureKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Outcome of one tool invocation.
///
/// Backend failures are carried as [`ToolOutput::Failure`] values so that a
/// single failing tool never aborts the surrounding response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutput {
    /// The tool produced a result.
    Success {
        /// Tool result content.
        content: Value,
    },
    /// The tool failed; `message` is user-facing text.
    Failure {
        /// Failure class.
        kind: ToolFailureKind,
        /// User-facing description of the failure.
        message: String,
    },
}

impl ToolOutput {
    /// Creates a successful output.
    #[must_use]
    pub const fn success(content: Value) -> Self {
        Self::Success { content }
    }

    /// Creates a failed output.
    #[must_use]
    pub fn failure(kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    /// Returns whether the output represents a failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Returns the success content, if any.
    #[must_use]
    pub const fn content(&self) -> Option<&Value> {
        match self {
            Self::Success { content } => Some(content),
            Self::Failure { .. } => None,
        }
    }

    /// Returns the failure kind, if any.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<ToolFailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Returns the text form of the output.
    ///
    /// String content is returned verbatim; other content is rendered as JSON.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Success {
                content: Value::String(text),
            } => text.clone(),
            Self::Success { content } => content.to_string(),
            Self::Failure { message, .. } => message.clone(),
        }
    }

    /// Converts the output into the JSON object placed under `result` in a
    /// response body.
    #[must_use]
    pub fn into_result_value(self) -> Value {
        match self {
            Self::Success { content } => content,
            Self::Failure { kind, message } => json!({
                "error": message,
                "kind": kind.as_str(),
            }),
        }
    }
}
