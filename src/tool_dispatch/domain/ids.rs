//! Identifier and validated-name types for tool dispatch.

use super::ToolDispatchDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length for a graph identifier.
const MAX_GRAPH_ID_LENGTH: usize = 64;

/// Unique identifier for a single tool execution handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(Uuid);

impl HandlerId {
    /// Creates a new random handler identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the wrapped UUID.
    #[must_use]
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Identifier assigned by the job queue to a background tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Creates a new random operation identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an operation identifier from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the wrapped UUID.
    #[must_use]
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Validated identifier of the graph a tool call targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(String);

impl GraphId {
    /// Creates a validated graph identifier.
    ///
    /// The input is trimmed. Only characters in `[A-Za-z0-9_-]` are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ToolDispatchDomainError`] when validation fails.
    pub fn new(value: impl Into<String>) -> Result<Self, ToolDispatchDomainError> {
        let normalized = value.into().trim().to_owned();

        if normalized.is_empty() {
            return Err(ToolDispatchDomainError::EmptyGraphId);
        }

        let is_valid = normalized.chars().all(|character| {
            character.is_ascii_alphanumeric() || character == '_' || character == '-'
        });
        if !is_valid {
            return Err(ToolDispatchDomainError::InvalidGraphId(normalized));
        }

        if normalized.len() > MAX_GRAPH_ID_LENGTH {
            return Err(ToolDispatchDomainError::GraphIdTooLong(normalized));
        }

        Ok(Self(normalized))
    }

    /// Returns the graph identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for GraphId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
