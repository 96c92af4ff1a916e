//! Tool call dispatch orchestration.

use super::handler::{HandlerContractViolation, ToolExecutionHandler};
use super::streaming::{ResultAggregator, StreamEventProducer};
use crate::tool_dispatch::{
    config::DispatchConfig,
    domain::{
        ClientProfile, ExecutionStrategy, GraphId, NDJSON_MEDIA_TYPE, OperationId,
        RequestHeaders, SSE_MEDIA_TYPE, SelectionOptions, SseFrame, StrategyDecision,
        StrategyInputs, StrategySelector, StreamEvent, StreamEventKind, SystemStateSnapshot,
        TimeoutCoordinator, ToolCall, ToolFailureKind, ToolName, ToolOutput,
    },
    ports::{
        CircuitBreaker, CircuitBreakerError, GraphBackend, JobQueue, JobQueueError,
        QueuedOperationStatus, QueuedToolCall, ToolResultCache,
    },
};
use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use mockable::Clock;
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

/// Media type of buffered JSON responses.
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// One tool call to dispatch, with the request context it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    /// Tool name and arguments.
    pub tool_call: ToolCall,
    /// Target graph.
    pub graph_id: GraphId,
    /// Request headers used for client detection.
    pub headers: RequestHeaders,
    /// Load snapshot taken when the request arrived.
    pub system_state: SystemStateSnapshot,
    /// Caller subscription tier, if known.
    pub user_tier: Option<String>,
    /// Query parameter overrides.
    pub options: SelectionOptions,
    /// Caller-requested tool timeout.
    pub timeout_override: Option<Duration>,
}

impl DispatchRequest {
    /// Creates a request with empty headers, an idle system and no
    /// overrides.
    #[must_use]
    pub fn new(tool_call: ToolCall, graph_id: GraphId) -> Self {
        Self {
            tool_call,
            graph_id,
            headers: RequestHeaders::new(),
            system_state: SystemStateSnapshot::default(),
            user_tier: None,
            options: SelectionOptions::default(),
            timeout_override: None,
        }
    }

    /// Sets the request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: RequestHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the load snapshot.
    #[must_use]
    pub const fn with_system_state(mut self, system_state: SystemStateSnapshot) -> Self {
        self.system_state = system_state;
        self
    }

    /// Sets the caller subscription tier.
    #[must_use]
    pub fn with_user_tier(mut self, user_tier: impl Into<String>) -> Self {
        self.user_tier = Some(user_tier.into());
        self
    }

    /// Sets the query parameter overrides.
    #[must_use]
    pub const fn with_options(mut self, options: SelectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the caller-requested tool timeout.
    #[must_use]
    pub const fn with_timeout_override(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }
}

/// Acknowledgement returned for a call handed to the job queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedBody {
    /// Always `true`; lets clients tell an acknowledgement from a result.
    pub queued: bool,
    /// Queue-assigned operation identifier.
    pub operation_id: OperationId,
    /// Where the caller can poll the operation.
    pub monitor_url: String,
    /// Human-readable acknowledgement.
    pub message: String,
}

/// Payload of a dispatch response.
pub enum DispatchBody {
    /// Buffered result.
    Json(Value),
    /// Server-Sent Events stream.
    Sse(BoxStream<'static, SseFrame>),
    /// Newline-delimited JSON stream; every item ends with `\n`.
    Ndjson(BoxStream<'static, String>),
    /// The call was queued.
    Queued(QueuedBody),
}

impl DispatchBody {
    /// Returns the media type the body is delivered as.
    #[must_use]
    pub const fn media_type(&self) -> &'static str {
        match self {
            Self::Json(_) | Self::Queued(_) => JSON_MEDIA_TYPE,
            Self::Sse(_) => SSE_MEDIA_TYPE,
            Self::Ndjson(_) => NDJSON_MEDIA_TYPE,
        }
    }

    /// Returns the JSON document for buffered bodies.
    ///
    /// Results are wrapped as `{"result": ..}`. Streams return `None`.
    #[must_use]
    pub fn json_document(&self) -> Option<Value> {
        match self {
            Self::Json(result) => Some(json!({ "result": result })),
            Self::Queued(queued) => serde_json::to_value(queued).ok(),
            Self::Sse(_) | Self::Ndjson(_) => None,
        }
    }
}

impl fmt::Debug for DispatchBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(result) => f.debug_tuple("Json").field(result).finish(),
            Self::Sse(_) => f.write_str("Sse(..)"),
            Self::Ndjson(_) => f.write_str("Ndjson(..)"),
            Self::Queued(queued) => f.debug_tuple("Queued").field(queued).finish(),
        }
    }
}

/// Outcome of one dispatch.
#[derive(Debug)]
pub struct DispatchResponse {
    /// Strategy the call was delivered with.
    pub strategy: ExecutionStrategy,
    /// Response deadline associated with the strategy.
    pub timeout: Duration,
    /// Response payload.
    pub body: DispatchBody,
}

/// Service-level errors for dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The circuit breaker refused the call.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerError),
    /// The job queue refused or lost the call.
    #[error(transparent)]
    Queue(#[from] JobQueueError),
    /// A handler was misused.
    #[error(transparent)]
    Handler(#[from] HandlerContractViolation),
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Dispatches tool calls to the strategy selected for each request.
///
/// Every collaborator is injected. Each call gets its own
/// [`ToolExecutionHandler`], which is always closed: directly for buffered
/// strategies and by the stream for streamed ones.
pub struct ToolCallDispatcher<B, Q, K, R, C>
where
    B: GraphBackend,
    Q: JobQueue,
    K: CircuitBreaker,
    R: ToolResultCache,
    C: Clock + Send + Sync + 'static,
{
    backend: Arc<B>,
    queue: Arc<Q>,
    breaker: Arc<K>,
    cache: Arc<R>,
    clock: Arc<C>,
    coordinator: Arc<TimeoutCoordinator>,
    selector: StrategySelector,
    producer: StreamEventProducer<C>,
    config: DispatchConfig,
}

impl<B, Q, K, R, C> ToolCallDispatcher<B, Q, K, R, C>
where
    B: GraphBackend,
    Q: JobQueue,
    K: CircuitBreaker,
    R: ToolResultCache,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a dispatcher; the timeout table is built from `config`.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        queue: Arc<Q>,
        breaker: Arc<K>,
        cache: Arc<R>,
        clock: Arc<C>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            coordinator: Arc::new(config.timeout_coordinator()),
            selector: StrategySelector::new(config.load_thresholds),
            producer: StreamEventProducer::new(Arc::clone(&clock), &config),
            backend,
            queue,
            breaker,
            cache,
            clock,
            config,
        }
    }

    /// Replaces the timeout coordinator, for sharing one table between
    /// dispatchers.
    #[must_use]
    pub fn with_timeout_coordinator(mut self, coordinator: Arc<TimeoutCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Returns the timeout coordinator in use.
    #[must_use]
    pub const fn timeout_coordinator(&self) -> &Arc<TimeoutCoordinator> {
        &self.coordinator
    }

    /// Dispatches one tool call.
    ///
    /// Backend failures never surface as errors; they are carried inside
    /// the result or as an `error` event.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::CircuitOpen`] when the circuit breaker
    /// refuses the call, [`DispatchError::Queue`] when the job queue
    /// rejects it, and [`DispatchError::Handler`] on handler misuse.
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchResult<DispatchResponse> {
        let profile = ClientProfile::detect(&request.headers);
        tracing::debug!(?profile, "detected client profile");
        let decision = self.selector.decide(&StrategyInputs {
            tool_call: &request.tool_call,
            client_profile: &profile,
            system_state: request.system_state,
            graph_id: &request.graph_id,
            user_tier: request.user_tier.as_deref(),
            options: request.options,
        });

        let span = tracing::info_span!(
            "dispatch",
            tool = %request.tool_call.name(),
            graph = %request.graph_id,
            tier = request.user_tier.as_deref().unwrap_or("none"),
            strategy = %decision.strategy,
        );
        self.dispatch_decided(request, profile, decision)
            .instrument(span)
            .await
    }

    async fn dispatch_decided(
        &self,
        request: DispatchRequest,
        profile: ClientProfile,
        decision: StrategyDecision,
    ) -> DispatchResult<DispatchResponse> {
        let started_at = self.clock.utc();
        tracing::info!("dispatch started");

        if let Err(refusal) = self
            .breaker
            .check(&request.graph_id, request.tool_call.name())
            .await
        {
            tracing::warn!(error = %refusal, "execution refused by circuit breaker");
            return Err(refusal.into());
        }

        let strategy = decision.strategy;
        let body = match strategy {
            ExecutionStrategy::QueueSimple => DispatchBody::Queued(self.enqueue(&request).await?),
            ExecutionStrategy::QueueWithMonitoring => {
                let queued = self.enqueue(&request).await?;
                DispatchBody::Sse(sse_frames(self.monitor_queue(&request, queued.operation_id)))
            }
            ExecutionStrategy::JsonImmediate | ExecutionStrategy::JsonComplete => {
                DispatchBody::Json(self.execute_buffered(&request).await?.into_result_value())
            }
            ExecutionStrategy::Cached
            | ExecutionStrategy::SchemaCached
            | ExecutionStrategy::InfoCached => {
                DispatchBody::Json(self.execute_cached(&request, &decision).await?)
            }
            ExecutionStrategy::StreamAggregated if profile.is_mcp_client => {
                let events = self.guarded_events(request, strategy);
                DispatchBody::Json(ResultAggregator::aggregate_stream(events).await.into_result_value())
            }
            ExecutionStrategy::StreamAggregated | ExecutionStrategy::NdjsonStreaming => {
                DispatchBody::Ndjson(ndjson_lines(self.guarded_events(request, strategy)))
            }
            ExecutionStrategy::SseProgress | ExecutionStrategy::SseStreaming => {
                DispatchBody::Sse(sse_frames(self.guarded_events(request, strategy)))
            }
        };

        tracing::info!(
            elapsed_ms = u64::try_from((self.clock.utc() - started_at).num_milliseconds())
                .unwrap_or(0),
            media_type = body.media_type(),
            "dispatch completed"
        );
        Ok(DispatchResponse {
            strategy,
            timeout: strategy.timeout(),
            body,
        })
    }

    fn handler(&self, graph_id: &GraphId) -> ToolExecutionHandler<B> {
        ToolExecutionHandler::new(
            Arc::clone(&self.backend),
            graph_id.clone(),
            Arc::clone(&self.coordinator),
            &self.config,
        )
    }

    async fn enqueue(&self, request: &DispatchRequest) -> DispatchResult<QueuedBody> {
        let timeouts = self
            .coordinator
            .config_for(request.tool_call.name().as_str());
        let call = QueuedToolCall {
            tool_call: request.tool_call.clone(),
            graph_id: request.graph_id.clone(),
            user_tier: request.user_tier.clone(),
            queue_timeout: timeouts.queue_timeout,
            instance_timeout: timeouts.instance_timeout,
        };
        let operation_id = self.queue.enqueue(&call).await?;
        tracing::info!(operation_id = %operation_id, "tool call queued");

        Ok(QueuedBody {
            queued: true,
            operation_id,
            monitor_url: format!(
                "{}/{operation_id}",
                self.config.monitor_base_url.trim_end_matches('/')
            ),
            message: format!(
                "Tool '{}' was queued because the system is under load",
                request.tool_call.name()
            ),
        })
    }

    /// Runs the call on a fresh handler under the endpoint timeout and
    /// closes the handler.
    async fn execute_buffered(&self, request: &DispatchRequest) -> DispatchResult<ToolOutput> {
        let tool_name = request.tool_call.name();
        let endpoint_timeout = self
            .coordinator
            .config_for(tool_name.as_str())
            .endpoint_timeout;
        let handler = self.handler(&request.graph_id);

        let outcome = tokio::time::timeout(
            endpoint_timeout,
            handler.call_tool(&request.tool_call, request.timeout_override),
        )
        .await;
        if let Err(error) = handler.close().await {
            tracing::warn!(%error, "failed to close tool execution handler");
        }

        let output = match outcome {
            Ok(result) => result?,
            Err(_) => ToolOutput::failure(
                ToolFailureKind::Timeout,
                format!(
                    "Tool '{tool_name}' timed out after {:.1}s at the endpoint. Add a LIMIT clause or narrow the query filters and try again.",
                    endpoint_timeout.as_secs_f64()
                ),
            ),
        };
        record_outcome(&*self.breaker, &request.graph_id, tool_name, !output.is_error()).await;
        Ok(output)
    }

    async fn execute_cached(
        &self,
        request: &DispatchRequest,
        decision: &StrategyDecision,
    ) -> DispatchResult<Value> {
        let Some(key) = decision.analysis.cache_key.as_deref() else {
            return Ok(self.execute_buffered(request).await?.into_result_value());
        };

        match self.cache.get(key).await {
            Ok(Some(cached)) => {
                tracing::debug!(cache_key = key, "result cache hit");
                return Ok(cached);
            }
            Ok(None) => tracing::debug!(cache_key = key, "result cache miss"),
            Err(error) => tracing::warn!(%error, "result cache lookup failed"),
        }

        let output = self.execute_buffered(request).await?;
        if let ToolOutput::Success { content } = &output {
            if let Err(error) = self.cache.put(key, content.clone()).await {
                tracing::warn!(%error, "failed to store result in cache");
            }
        }
        Ok(output.into_result_value())
    }

    /// Streams the call through a fresh handler. The handler is closed and
    /// the outcome recorded just before the terminal event is yielded; an
    /// early drop closes the handler in the background.
    fn guarded_events(
        &self,
        request: DispatchRequest,
        strategy: ExecutionStrategy,
    ) -> BoxStream<'static, StreamEvent> {
        let handler = Arc::new(self.handler(&request.graph_id));
        let mut events = self.producer.produce(
            Arc::clone(&handler),
            request.tool_call.clone(),
            request.timeout_override,
            strategy,
        );
        let mut guard = HandlerCloseGuard::new(handler);
        let breaker = Arc::clone(&self.breaker);
        let DispatchRequest {
            tool_call,
            graph_id,
            ..
        } = request;

        Box::pin(stream! {
            while let Some(event) = events.next().await {
                if matches!(event.kind(), StreamEventKind::Complete | StreamEventKind::Error) {
                    guard.close().await;
                    record_outcome(&*breaker, &graph_id, tool_call.name(), !event.is_error()).await;
                }
                yield event;
            }
        })
    }

    /// Polls the queue until the operation finishes or the queue strategy
    /// deadline passes.
    fn monitor_queue(
        &self,
        request: &DispatchRequest,
        operation_id: OperationId,
    ) -> BoxStream<'static, StreamEvent> {
        let queue = Arc::clone(&self.queue);
        let breaker = Arc::clone(&self.breaker);
        let clock = Arc::clone(&self.clock);
        let poll_interval = self.config.monitor_poll_interval;
        let deadline = ExecutionStrategy::QueueWithMonitoring.timeout();
        let graph_id = request.graph_id.clone();
        let tool_name = request.tool_call.name().clone();

        Box::pin(stream! {
            let started_at = clock.utc();
            yield StreamEvent::Start {
                tool_name: tool_name.as_str().to_owned(),
                strategy: ExecutionStrategy::QueueWithMonitoring,
                started_at,
            };
            let polling_started = tokio::time::Instant::now();

            loop {
                let status = match queue.status(operation_id).await {
                    Ok(status) => status,
                    Err(error) => {
                        tracing::warn!(%error, %operation_id, "queue status poll failed");
                        yield StreamEvent::error(ToolFailureKind::Unexpected, error.to_string());
                        return;
                    }
                };

                let position = match status {
                    QueuedOperationStatus::Pending { position } => Some(position),
                    _ => None,
                };
                yield StreamEvent::QueueStatus {
                    operation_id,
                    status: status.as_str().to_owned(),
                    position,
                };

                match status {
                    QueuedOperationStatus::Completed(ToolOutput::Success { content }) => {
                        record_outcome(&*breaker, &graph_id, &tool_name, true).await;
                        yield StreamEvent::Result { result: content };
                        return;
                    }
                    QueuedOperationStatus::Completed(ToolOutput::Failure { kind, message }) => {
                        record_outcome(&*breaker, &graph_id, &tool_name, false).await;
                        yield StreamEvent::error(kind, message);
                        return;
                    }
                    QueuedOperationStatus::Failed(reason) => {
                        record_outcome(&*breaker, &graph_id, &tool_name, false).await;
                        yield StreamEvent::error(ToolFailureKind::Unexpected, reason);
                        return;
                    }
                    QueuedOperationStatus::Pending { .. } | QueuedOperationStatus::Running => {}
                }

                if polling_started.elapsed() >= deadline {
                    yield StreamEvent::error(
                        ToolFailureKind::Timeout,
                        format!("queued operation {operation_id} timed out after {}s", deadline.as_secs()),
                    );
                    return;
                }
                tokio::time::sleep(poll_interval).await;
            }
        })
    }
}

async fn record_outcome<K: CircuitBreaker + ?Sized>(
    breaker: &K,
    graph_id: &GraphId,
    tool_name: &ToolName,
    succeeded: bool,
) {
    if succeeded {
        breaker.record_success(graph_id, tool_name).await;
    } else {
        breaker.record_failure(graph_id, tool_name).await;
    }
}

/// Closes a streamed call's handler exactly once.
///
/// Dropping an unclosed guard spawns the close on the current runtime.
struct HandlerCloseGuard<B: GraphBackend> {
    handler: Option<Arc<ToolExecutionHandler<B>>>,
}

impl<B: GraphBackend> HandlerCloseGuard<B> {
    const fn new(handler: Arc<ToolExecutionHandler<B>>) -> Self {
        Self {
            handler: Some(handler),
        }
    }

    async fn close(&mut self) {
        if let Some(handler) = self.handler.take() {
            close_handler(&handler).await;
        }
    }
}

impl<B: GraphBackend> Drop for HandlerCloseGuard<B> {
    fn drop(&mut self) {
        let Some(handler) = self.handler.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { close_handler(&handler).await });
            }
            Err(_) => tracing::warn!(
                handler = %handler.id(),
                "stream dropped outside a runtime; handler left unclosed"
            ),
        }
    }
}

async fn close_handler<B: GraphBackend>(handler: &ToolExecutionHandler<B>) {
    if let Err(error) = handler.close().await {
        tracing::warn!(handler = %handler.id(), %error, "failed to close tool execution handler");
    }
}

fn sse_frames(events: BoxStream<'static, StreamEvent>) -> BoxStream<'static, SseFrame> {
    events
        .map(|event| {
            event.to_sse_frame().unwrap_or_else(|error| SseFrame {
                event: StreamEventKind::Error.as_str().to_owned(),
                data: json!({
                    "kind": ToolFailureKind::Unexpected.as_str(),
                    "message": error.to_string(),
                })
                .to_string(),
            })
        })
        .boxed()
}

fn ndjson_lines(events: BoxStream<'static, StreamEvent>) -> BoxStream<'static, String> {
    events
        .map(|event| {
            event.to_ndjson_line().unwrap_or_else(|error| {
                let mut line = json!({
                    "event": StreamEventKind::Error.as_str(),
                    "data": {
                        "kind": ToolFailureKind::Unexpected.as_str(),
                        "message": error.to_string(),
                    },
                })
                .to_string();
                line.push('\n');
                line
            })
        })
        .boxed()
}
