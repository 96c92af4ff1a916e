//! In-memory graph backend adapter with scripted tool responses.

use crate::tool_dispatch::{
    domain::GraphId,
    ports::{
        BackendToolRequest, GraphBackend, GraphBackendClient, GraphBackendError,
        GraphBackendResult,
    },
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// In-memory graph backend.
///
/// Tool responses, latency and failures are scripted per tool name. This
/// adapter is suitable for unit and integration tests and for local
/// deterministic dispatch flows.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphBackend {
    state: Arc<RwLock<InMemoryBackendState>>,
    counters: Arc<BackendCounters>,
}

#[derive(Debug, Default)]
struct InMemoryBackendState {
    responses: HashMap<String, GraphBackendResult<Value>>,
    latencies: HashMap<String, Duration>,
    connect_delay: Option<Duration>,
    connect_failure: Option<GraphBackendError>,
    close_failure: Option<GraphBackendError>,
}

#[derive(Debug, Default)]
struct BackendCounters {
    connects: AtomicUsize,
    calls: AtomicUsize,
    closes: AtomicUsize,
}

fn lock_error(err: impl ToString) -> GraphBackendError {
    GraphBackendError::unexpected(std::io::Error::other(err.to_string()))
}

impl InMemoryGraphBackend {
    /// Creates a backend with no scripted tools.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the result returned for a tool.
    ///
    /// # Errors
    ///
    /// Returns backend errors when lock acquisition fails.
    pub fn set_response(
        &self,
        tool_name: impl Into<String>,
        response: GraphBackendResult<Value>,
    ) -> GraphBackendResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        state.responses.insert(tool_name.into(), response);
        Ok(())
    }

    /// Scripts how long a tool takes before answering.
    ///
    /// # Errors
    ///
    /// Returns backend errors when lock acquisition fails.
    pub fn set_latency(
        &self,
        tool_name: impl Into<String>,
        latency: Duration,
    ) -> GraphBackendResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        state.latencies.insert(tool_name.into(), latency);
        Ok(())
    }

    /// Delays every connection attempt.
    ///
    /// # Errors
    ///
    /// Returns backend errors when lock acquisition fails.
    pub fn set_connect_delay(&self, delay: Duration) -> GraphBackendResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        state.connect_delay = Some(delay);
        Ok(())
    }

    /// Makes every connection attempt fail.
    ///
    /// # Errors
    ///
    /// Returns backend errors when lock acquisition fails.
    pub fn fail_connect(&self, error: GraphBackendError) -> GraphBackendResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        state.connect_failure = Some(error);
        Ok(())
    }

    /// Makes every client close fail.
    ///
    /// # Errors
    ///
    /// Returns backend errors when lock acquisition fails.
    pub fn fail_close(&self, error: GraphBackendError) -> GraphBackendResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        state.close_failure = Some(error);
        Ok(())
    }

    /// Returns how many clients have been connected.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Returns how many tool calls reached the backend.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    /// Returns how many client close attempts were made.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphBackend for InMemoryGraphBackend {
    type Client = InMemoryGraphClient;

    async fn connect(&self, graph_id: &GraphId) -> GraphBackendResult<Self::Client> {
        let (delay, failure) = {
            let state = self.state.read().map_err(lock_error)?;
            (state.connect_delay, state.connect_failure.clone())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = failure {
            return Err(error);
        }

        Ok(InMemoryGraphClient {
            graph_id: graph_id.clone(),
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
            closed: AtomicBool::new(false),
        })
    }
}

/// Client produced by [`InMemoryGraphBackend`].
#[derive(Debug)]
pub struct InMemoryGraphClient {
    graph_id: GraphId,
    state: Arc<RwLock<InMemoryBackendState>>,
    counters: Arc<BackendCounters>,
    closed: AtomicBool,
}

impl InMemoryGraphClient {
    /// Returns the graph this client is connected to.
    #[must_use]
    pub const fn graph_id(&self) -> &GraphId {
        &self.graph_id
    }
}

#[async_trait]
impl GraphBackendClient for InMemoryGraphClient {
    async fn call_tool(&self, request: &BackendToolRequest) -> GraphBackendResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GraphBackendError::Connection(format!(
                "client for graph {} is closed",
                self.graph_id
            )));
        }

        let tool_name = request.tool_call.name().as_str();
        let (latency, response) = {
            let state = self.state.read().map_err(lock_error)?;
            (
                state.latencies.get(tool_name).copied(),
                state.responses.get(tool_name).cloned(),
            )
        };

        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        response.unwrap_or_else(|| {
            Err(GraphBackendError::protocol(
                "unknown_tool",
                format!("tool '{tool_name}' is not available"),
            ))
        })
    }

    async fn close(&self) -> GraphBackendResult<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);

        let failure = {
            let state = self.state.read().map_err(lock_error)?;
            state.close_failure.clone()
        };
        failure.map_or(Ok(()), Err)
    }
}
