//! Circuit breaker port consulted around each execution.

use crate::tool_dispatch::domain::{GraphId, ToolName};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Per `(graph, tool)` failure-rate gate.
///
/// The dispatcher calls [`CircuitBreaker::check`] once before executing and
/// exactly one of the `record_*` methods afterwards. Counter bookkeeping is
/// owned by the implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CircuitBreaker: Send + Sync + 'static {
    /// Refuses execution when the circuit for `(graph_id, tool_name)` is open.
    async fn check(&self, graph_id: &GraphId, tool_name: &ToolName)
    -> Result<(), CircuitBreakerError>;

    /// Records a successful execution.
    async fn record_success(&self, graph_id: &GraphId, tool_name: &ToolName);

    /// Records a failed execution.
    async fn record_failure(&self, graph_id: &GraphId, tool_name: &ToolName);
}

/// Errors returned by circuit breaker implementations.
#[derive(Debug, Clone, Error)]
pub enum CircuitBreakerError {
    /// Recent failures tripped the circuit.
    #[error("circuit open for tool '{tool_name}' on graph {graph_id}")]
    Open {
        /// Target graph.
        graph_id: GraphId,
        /// Tool whose circuit is open.
        tool_name: ToolName,
    },

    /// Circuit breaker infrastructure failure.
    #[error("circuit breaker unavailable: {0}")]
    Unavailable(Arc<dyn std::error::Error + Send + Sync>),
}

impl CircuitBreakerError {
    /// Wraps a circuit breaker infrastructure failure.
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Arc::new(err))
    }
}
