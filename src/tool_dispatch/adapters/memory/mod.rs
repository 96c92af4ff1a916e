//! In-memory adapters for tool dispatch ports.

mod backend;
mod cache;
mod circuit_breaker;
mod queue;

pub use backend::{InMemoryGraphBackend, InMemoryGraphClient};
pub use cache::InMemoryToolResultCache;
pub use circuit_breaker::{CircuitCounters, DEFAULT_FAILURE_THRESHOLD, InMemoryCircuitBreaker};
pub use queue::InMemoryJobQueue;
