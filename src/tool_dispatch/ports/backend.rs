//! Graph backend port for executing tools.

use crate::tool_dispatch::domain::{GraphId, ToolCall};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for graph backend operations.
pub type GraphBackendResult<T> = Result<T, GraphBackendError>;

/// A tool invocation as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendToolRequest {
    /// Tool name and arguments.
    pub tool_call: ToolCall,
    /// Target graph.
    pub graph_id: GraphId,
    /// Deadline the backend should enforce on its own execution.
    pub instance_timeout: Duration,
}

/// Factory for per-call backend clients.
#[cfg_attr(test, mockall::automock(type Client = MockGraphBackendClient;))]
#[async_trait]
pub trait GraphBackend: Send + Sync + 'static {
    /// Client type produced by [`GraphBackend::connect`].
    type Client: GraphBackendClient;

    /// Connects a client for one graph.
    async fn connect(&self, graph_id: &GraphId) -> GraphBackendResult<Self::Client>;
}

/// Connected client able to run tools against one graph.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphBackendClient: Send + Sync + 'static {
    /// Executes a tool and returns its raw result content.
    async fn call_tool(&self, request: &BackendToolRequest) -> GraphBackendResult<Value>;

    /// Releases the client's connections.
    async fn close(&self) -> GraphBackendResult<()>;
}

/// Additional resource owned by a handler for the duration of one call.
#[async_trait]
pub trait ClosableResource: Send + Sync {
    /// Resource name used in diagnostics.
    fn name(&self) -> &str;

    /// Releases the resource.
    async fn close(&self) -> GraphBackendResult<()>;
}

/// Errors returned by graph backend adapters.
#[derive(Debug, Clone, Error)]
pub enum GraphBackendError {
    /// The backend could not be reached or refused the connection.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The backend refused the call as too complex or otherwise constrained.
    #[error("{0}")]
    ConstraintViolation(String),

    /// The backend reported a structured failure.
    #[error("{message} ({code})")]
    Protocol {
        /// Backend error code.
        code: String,
        /// Backend error message.
        message: String,
    },

    /// Any other failure.
    #[error("{0}")]
    Unexpected(Arc<dyn std::error::Error + Send + Sync>),
}

impl GraphBackendError {
    /// Wraps an unexpected error from the backend adapter.
    pub fn unexpected(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unexpected(Arc::new(err))
    }

    /// Creates a structured protocol error.
    pub fn protocol(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            code: code.into(),
            message: message.into(),
        }
    }
}
