//! Background job queue port.

use crate::tool_dispatch::domain::{GraphId, OperationId, ToolCall, ToolOutput};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for job queue operations.
pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// A tool call handed to the background queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedToolCall {
    /// Tool name and arguments.
    pub tool_call: ToolCall,
    /// Target graph.
    pub graph_id: GraphId,
    /// Caller subscription tier, if known.
    pub user_tier: Option<String>,
    /// Maximum time the call may wait for a worker.
    pub queue_timeout: Duration,
    /// Deadline for the backend execution once a worker picks it up.
    pub instance_timeout: Duration,
}

/// Progress of a queued operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedOperationStatus {
    /// Waiting for a worker.
    Pending {
        /// Zero-based position in the queue.
        position: usize,
    },
    /// A worker is executing the call.
    Running,
    /// The call finished; failures are carried inside the output.
    Completed(ToolOutput),
    /// The queue gave up on the call.
    Failed(String),
}

impl QueuedOperationStatus {
    /// Returns the canonical status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Running => "running",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
        }
    }

    /// Returns whether the operation has finished.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

/// Contract for the background job queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Enqueues a tool call and returns its operation identifier.
    async fn enqueue(&self, call: &QueuedToolCall) -> JobQueueResult<OperationId>;

    /// Reports the current status of an operation.
    async fn status(&self, operation_id: OperationId) -> JobQueueResult<QueuedOperationStatus>;
}

/// Errors returned by job queue adapters.
#[derive(Debug, Clone, Error)]
pub enum JobQueueError {
    /// The queue refused the call, typically because it is full.
    #[error("job queue rejected the call: {0}")]
    Rejected(String),

    /// No operation exists with the given identifier.
    #[error("unknown queued operation: {0}")]
    UnknownOperation(OperationId),

    /// Queue infrastructure failure.
    #[error("job queue error: {0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),
}

impl JobQueueError {
    /// Wraps a queue infrastructure failure.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Arc::new(err))
    }
}
