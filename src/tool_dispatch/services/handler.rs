//! Per-call owner of a graph backend client.

use crate::tool_dispatch::{
    config::DispatchConfig,
    domain::{
        GraphId, HandlerId, HandlerLifecycleState, TimeoutCoordinator, ToolCall,
        ToolFailureKind, ToolOutput,
    },
    ports::{
        BackendToolRequest, ClosableResource, GraphBackend, GraphBackendClient,
        GraphBackendError,
    },
};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Misuse of a handler. The only error [`ToolExecutionHandler`] raises.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerContractViolation {
    /// The handler was used after `close()`.
    #[error("tool execution handler {handler_id} is closed")]
    HandlerClosed {
        /// Handler that rejected the operation.
        handler_id: HandlerId,
    },

    /// One or more owned resources failed to close.
    #[error("failed to close {} handler resource(s): {}", failures.len(), failures.join("; "))]
    ResourceCloseFailed {
        /// One message per failed close, prefixed with the resource name.
        failures: Vec<String>,
    },
}

type SharedState = Arc<RwLock<HandlerLifecycleState>>;
type InitFuture<C> = Shared<BoxFuture<'static, Result<Arc<C>, GraphBackendError>>>;

/// Executes tool calls for one graph through a lazily connected client.
///
/// Construction schedules the backend connection on the current Tokio
/// runtime without blocking. Every operation awaits the same memoised
/// connection, so the backend is connected at most once per handler and a
/// failed connection is reported to every later call.
///
/// Backend failures and timeouts are returned as [`ToolOutput::Failure`]
/// values. Only [`HandlerContractViolation`] is raised.
pub struct ToolExecutionHandler<B: GraphBackend> {
    id: HandlerId,
    graph_id: GraphId,
    coordinator: Arc<TimeoutCoordinator>,
    max_timeout_override: Duration,
    init: InitFuture<B::Client>,
    init_task: Mutex<Option<JoinHandle<()>>>,
    state: SharedState,
    resources: RwLock<Vec<Box<dyn ClosableResource>>>,
}

fn read_state(state: &SharedState) -> HandlerLifecycleState {
    *state.read().unwrap_or_else(PoisonError::into_inner)
}

/// Moves `state` to `target` when the transition is allowed.
fn advance(state: &SharedState, target: HandlerLifecycleState) -> bool {
    let mut current = state.write().unwrap_or_else(PoisonError::into_inner);
    match current.transition_to(target) {
        Ok(next) => {
            *current = next;
            true
        }
        Err(_) => false,
    }
}

async fn connect_once<B: GraphBackend>(
    backend: Arc<B>,
    graph_id: GraphId,
    state: SharedState,
) -> Result<Arc<B::Client>, GraphBackendError> {
    if !advance(&state, HandlerLifecycleState::Initializing) {
        return Err(closed_before_ready(&graph_id));
    }

    let client = match backend.connect(&graph_id).await {
        Ok(client) => client,
        Err(error) => {
            advance(&state, HandlerLifecycleState::Uninitialized);
            tracing::warn!(graph = %graph_id, %error, "graph backend connection failed");
            return Err(error);
        }
    };

    if advance(&state, HandlerLifecycleState::Ready) {
        tracing::debug!(graph = %graph_id, "graph backend client ready");
        return Ok(Arc::new(client));
    }

    // Closed while connecting; nobody else will release this client.
    if let Err(error) = client.close().await {
        tracing::warn!(graph = %graph_id, %error, "failed to close late graph client");
    }
    Err(closed_before_ready(&graph_id))
}

fn closed_before_ready(graph_id: &GraphId) -> GraphBackendError {
    GraphBackendError::Connection(format!(
        "handler for graph {graph_id} closed before the client was ready"
    ))
}

impl<B: GraphBackend> ToolExecutionHandler<B> {
    /// Creates a handler and schedules the backend connection.
    ///
    /// Outside a Tokio runtime nothing is spawned and the connection starts
    /// with the first operation instead.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        graph_id: GraphId,
        coordinator: Arc<TimeoutCoordinator>,
        config: &DispatchConfig,
    ) -> Self {
        let state: SharedState = Arc::new(RwLock::new(HandlerLifecycleState::Uninitialized));
        let init = connect_once(backend, graph_id.clone(), Arc::clone(&state))
            .boxed()
            .shared();
        let init_task = tokio::runtime::Handle::try_current().ok().map(|runtime| {
            let pending = init.clone();
            runtime.spawn(async move {
                if let Err(error) = pending.await {
                    tracing::debug!(%error, "eager handler initialisation failed");
                }
            })
        });

        Self {
            id: HandlerId::new(),
            graph_id,
            coordinator,
            max_timeout_override: config.max_timeout_override,
            init,
            init_task: Mutex::new(init_task),
            state,
            resources: RwLock::new(Vec::new()),
        }
    }

    /// Returns the handler identifier.
    #[must_use]
    pub const fn id(&self) -> HandlerId {
        self.id
    }

    /// Returns the graph this handler executes against.
    #[must_use]
    pub const fn graph_id(&self) -> &GraphId {
        &self.graph_id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> HandlerLifecycleState {
        read_state(&self.state)
    }

    fn ensure_open(&self) -> Result<(), HandlerContractViolation> {
        if self.state().is_open() {
            Ok(())
        } else {
            Err(HandlerContractViolation::HandlerClosed {
                handler_id: self.id,
            })
        }
    }

    /// Hands an extra resource to the handler; it is closed by
    /// [`Self::close`].
    ///
    /// # Errors
    ///
    /// Returns [`HandlerContractViolation::HandlerClosed`] when the handler
    /// is already closed.
    pub fn attach_resource(
        &self,
        resource: Box<dyn ClosableResource>,
    ) -> Result<(), HandlerContractViolation> {
        self.ensure_open()?;
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resource);
        Ok(())
    }

    /// Executes a tool call against the backend.
    ///
    /// The tool timeout comes from the coordinator; `timeout_override`
    /// replaces it, capped at the configured ceiling. Backend failures,
    /// including timeouts, are returned as [`ToolOutput::Failure`].
    ///
    /// # Errors
    ///
    /// Returns [`HandlerContractViolation::HandlerClosed`] when the handler
    /// is closed before or while the backend client initialises.
    pub async fn call_tool(
        &self,
        tool_call: &ToolCall,
        timeout_override: Option<Duration>,
    ) -> Result<ToolOutput, HandlerContractViolation> {
        self.ensure_open()?;
        let initialised = self.init.clone().await;
        self.ensure_open()?;

        let client = match initialised {
            Ok(client) => client,
            Err(error) => return Ok(self.backend_failure(tool_call, &error)),
        };

        let tool_name = tool_call.name().as_str();
        let timeouts = self.coordinator.config_for(tool_name);
        let tool_timeout = timeout_override.map_or(timeouts.tool_timeout, |requested| {
            requested.min(self.max_timeout_override)
        });
        let request = BackendToolRequest {
            tool_call: tool_call.clone(),
            graph_id: self.graph_id.clone(),
            instance_timeout: timeouts.instance_timeout,
        };

        let output = match tokio::time::timeout(tool_timeout, client.call_tool(&request)).await {
            Ok(Ok(content)) => ToolOutput::success(content),
            Ok(Err(error)) => self.backend_failure(tool_call, &error),
            Err(_) => {
                tracing::warn!(
                    graph = %self.graph_id,
                    tool = tool_name,
                    timeout_ms = duration_millis(tool_timeout),
                    "tool call timed out"
                );
                ToolOutput::failure(ToolFailureKind::Timeout, timeout_message(tool_name, tool_timeout))
            }
        };
        Ok(output)
    }

    fn backend_failure(&self, tool_call: &ToolCall, error: &GraphBackendError) -> ToolOutput {
        tracing::warn!(
            graph = %self.graph_id,
            tool = tool_call.name().as_str(),
            %error,
            "tool call failed"
        );
        ToolOutput::failure(failure_kind(error), error.to_string())
    }

    /// Releases the backend client and every attached resource.
    ///
    /// Idempotent. Every resource is closed even when an earlier one fails,
    /// and the handler always ends up closed.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerContractViolation::ResourceCloseFailed`] listing
    /// every close that failed.
    pub async fn close(&self) -> Result<(), HandlerContractViolation> {
        let previous = {
            let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let previous = *current;
            if !previous.is_open() {
                return Ok(());
            }
            *current = HandlerLifecycleState::Closed;
            previous
        };

        if let Some(task) = self
            .init_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        let mut failures = Vec::new();
        if previous == HandlerLifecycleState::Ready {
            if let Ok(client) = self.init.clone().await {
                if let Err(error) = client.close().await {
                    failures.push(format!("graph client: {error}"));
                }
            }
        }

        let resources = std::mem::take(
            &mut *self
                .resources
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for resource in resources {
            if let Err(error) = resource.close().await {
                failures.push(format!("{}: {error}", resource.name()));
            }
        }

        if failures.is_empty() {
            tracing::debug!(handler = %self.id, graph = %self.graph_id, "handler closed");
            Ok(())
        } else {
            tracing::warn!(handler = %self.id, failures = ?failures, "handler closed with failures");
            Err(HandlerContractViolation::ResourceCloseFailed { failures })
        }
    }
}

const fn failure_kind(error: &GraphBackendError) -> ToolFailureKind {
    match error {
        GraphBackendError::ConstraintViolation(_) => ToolFailureKind::ConstraintViolation,
        GraphBackendError::Protocol { .. } => ToolFailureKind::BackendProtocol,
        GraphBackendError::Connection(_) | GraphBackendError::Unexpected(_) => {
            ToolFailureKind::Unexpected
        }
    }
}

fn timeout_message(tool_name: &str, timeout: Duration) -> String {
    format!(
        "Tool '{tool_name}' timed out after {:.1}s. Add a LIMIT clause or narrow the query filters and try again.",
        timeout.as_secs_f64()
    )
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
