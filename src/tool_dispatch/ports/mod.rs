//! Port contracts for the collaborators a dispatch depends on.

mod backend;
mod cache;
mod circuit_breaker;
mod queue;

pub use backend::{
    BackendToolRequest, ClosableResource, GraphBackend, GraphBackendClient, GraphBackendError,
    GraphBackendResult,
};
pub use cache::{ToolResultCache, ToolResultCacheError, ToolResultCacheResult};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError};
pub use queue::{JobQueue, JobQueueError, JobQueueResult, QueuedOperationStatus, QueuedToolCall};

#[cfg(test)]
pub use backend::{MockGraphBackend, MockGraphBackendClient};
#[cfg(test)]
pub use cache::MockToolResultCache;
#[cfg(test)]
pub use circuit_breaker::MockCircuitBreaker;
#[cfg(test)]
pub use queue::MockJobQueue;
