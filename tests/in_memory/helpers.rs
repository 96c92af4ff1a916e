//! Shared test helpers for in-memory tool dispatch integration tests.

use std::sync::{Arc, Once};

use mockable::DefaultClock;
use rstest::fixture;
use serde_json::{Map, Value};
use toolcall_dispatch::tool_dispatch::{
    adapters::memory::{
        InMemoryCircuitBreaker, InMemoryGraphBackend, InMemoryJobQueue, InMemoryToolResultCache,
    },
    config::DispatchConfig,
    domain::{GraphId, ToolCall},
    services::{DispatchRequest, ToolCallDispatcher},
};

/// Dispatcher wired to in-memory adapters.
pub type TestDispatcher = ToolCallDispatcher<
    InMemoryGraphBackend,
    InMemoryJobQueue,
    InMemoryCircuitBreaker,
    InMemoryToolResultCache,
    DefaultClock,
>;

/// In-memory collaborators plus a dispatcher using them.
pub struct TestContext {
    /// Scripted graph backend.
    pub backend: InMemoryGraphBackend,
    /// Scripted job queue.
    pub queue: InMemoryJobQueue,
    /// Circuit breaker with a threshold of two consecutive failures.
    pub breaker: Arc<InMemoryCircuitBreaker>,
    /// Result cache.
    pub cache: InMemoryToolResultCache,
    /// Dispatcher under test.
    pub dispatcher: TestDispatcher,
}

impl TestContext {
    /// Builds a context around `config`.
    #[must_use]
    pub fn with_config(config: DispatchConfig) -> Self {
        init_tracing();
        let backend = InMemoryGraphBackend::new();
        let queue = InMemoryJobQueue::new();
        let breaker = Arc::new(InMemoryCircuitBreaker::new(2));
        let cache = InMemoryToolResultCache::new();
        let dispatcher = ToolCallDispatcher::new(
            Arc::new(backend.clone()),
            Arc::new(queue.clone()),
            Arc::clone(&breaker),
            Arc::new(cache.clone()),
            Arc::new(DefaultClock),
            config,
        );
        Self {
            backend,
            queue,
            breaker,
            cache,
            dispatcher,
        }
    }
}

/// Provides a context with a fast queue monitor.
#[fixture]
pub fn context() -> TestContext {
    TestContext::with_config(
        DispatchConfig::default().with_monitor_poll_interval(std::time::Duration::from_millis(5)),
    )
}

/// Returns the graph identifier used throughout the tests.
#[must_use]
pub fn graph_id() -> GraphId {
    GraphId::new("kg_main").expect("valid graph id")
}

/// Installs a test log subscriber once per test binary; `RUST_LOG`
/// controls verbosity.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Builds a tool call from a JSON object of arguments.
#[must_use]
pub fn tool_call(tool: &str, args: Value) -> ToolCall {
    let arguments = match args {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    ToolCall::named(tool, arguments).expect("valid tool call")
}

/// Builds a dispatch request against the default test graph.
#[must_use]
pub fn dispatch_request(tool: &str, args: Value) -> DispatchRequest {
    DispatchRequest::new(tool_call(tool, args), graph_id())
}
