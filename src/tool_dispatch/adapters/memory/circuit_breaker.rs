//! In-memory consecutive-failure circuit breaker.

use crate::tool_dispatch::{
    domain::{GraphId, ToolName},
    ports::{CircuitBreaker, CircuitBreakerError},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Default number of consecutive failures that opens a circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Circuit breaker that opens after a run of consecutive failures for one
/// `(graph, tool)` pair. A success closes the circuit again.
#[derive(Debug, Clone)]
pub struct InMemoryCircuitBreaker {
    failure_threshold: u32,
    state: Arc<RwLock<HashMap<CircuitKey, CircuitCounters>>>,
}

type CircuitKey = (GraphId, String);

/// Outcome counters tracked for one circuit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitCounters {
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// Total successes recorded.
    pub successes: u32,
    /// Total failures recorded.
    pub failures: u32,
}

impl Default for InMemoryCircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

fn key(graph_id: &GraphId, tool_name: &ToolName) -> CircuitKey {
    (graph_id.clone(), tool_name.as_str().to_owned())
}

impl InMemoryCircuitBreaker {
    /// Creates a breaker opening after `failure_threshold` consecutive
    /// failures. A threshold of zero is treated as one.
    #[must_use]
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            state: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the counters recorded for a circuit.
    #[must_use]
    pub fn counters(&self, graph_id: &GraphId, tool_name: &ToolName) -> CircuitCounters {
        self.state
            .read()
            .ok()
            .and_then(|state| state.get(&key(graph_id, tool_name)).copied())
            .unwrap_or_default()
    }

    fn record(&self, graph_id: &GraphId, tool_name: &ToolName, succeeded: bool) {
        let Ok(mut state) = self.state.write() else {
            tracing::warn!(graph_id = %graph_id, tool = %tool_name.as_str(), "circuit state lock poisoned");
            return;
        };
        let counters = state.entry(key(graph_id, tool_name)).or_default();
        if succeeded {
            counters.successes = counters.successes.saturating_add(1);
            counters.consecutive_failures = 0;
        } else {
            counters.failures = counters.failures.saturating_add(1);
            counters.consecutive_failures = counters.consecutive_failures.saturating_add(1);
        }
    }
}

#[async_trait]
impl CircuitBreaker for InMemoryCircuitBreaker {
    async fn check(
        &self,
        graph_id: &GraphId,
        tool_name: &ToolName,
    ) -> Result<(), CircuitBreakerError> {
        let consecutive_failures = {
            let state = self
                .state
                .read()
                .map_err(|err| CircuitBreakerError::unavailable(std::io::Error::other(err.to_string())))?;
            state
                .get(&key(graph_id, tool_name))
                .map_or(0, |counters| counters.consecutive_failures)
        };

        if consecutive_failures >= self.failure_threshold {
            return Err(CircuitBreakerError::Open {
                graph_id: graph_id.clone(),
                tool_name: tool_name.clone(),
            });
        }
        Ok(())
    }

    async fn record_success(&self, graph_id: &GraphId, tool_name: &ToolName) {
        self.record(graph_id, tool_name, true);
    }

    async fn record_failure(&self, graph_id: &GraphId, tool_name: &ToolName) {
        self.record(graph_id, tool_name, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circuit() -> (GraphId, ToolName) {
        (
            GraphId::new("kg1").expect("valid graph id"),
            ToolName::new("read-graph-cypher").expect("valid tool name"),
        )
    }

    #[tokio::test]
    async fn opens_after_threshold_and_closes_on_success() {
        let breaker = InMemoryCircuitBreaker::new(2);
        let (graph_id, tool_name) = circuit();

        breaker.record_failure(&graph_id, &tool_name).await;
        assert!(breaker.check(&graph_id, &tool_name).await.is_ok());

        breaker.record_failure(&graph_id, &tool_name).await;
        assert!(matches!(
            breaker.check(&graph_id, &tool_name).await,
            Err(CircuitBreakerError::Open { .. })
        ));

        breaker.record_success(&graph_id, &tool_name).await;
        assert!(breaker.check(&graph_id, &tool_name).await.is_ok());
        assert_eq!(
            breaker.counters(&graph_id, &tool_name),
            CircuitCounters {
                consecutive_failures: 0,
                successes: 1,
                failures: 2,
            }
        );
    }

    #[tokio::test]
    async fn circuits_are_independent_per_tool() {
        let breaker = InMemoryCircuitBreaker::new(1);
        let (graph_id, tool_name) = circuit();
        let other = ToolName::new("get-graph-info").expect("valid tool name");

        breaker.record_failure(&graph_id, &tool_name).await;

        assert!(breaker.check(&graph_id, &tool_name).await.is_err());
        assert!(breaker.check(&graph_id, &other).await.is_ok());
    }
}
