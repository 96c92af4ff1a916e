//! In-memory integration tests for tool execution handler lifecycles.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rstest::rstest;
use serde_json::json;
use toolcall_dispatch::tool_dispatch::{
    adapters::memory::InMemoryGraphBackend,
    config::DispatchConfig,
    domain::{HandlerLifecycleState, TimeoutConfiguration, TimeoutCoordinator, ToolFailureKind},
    ports::{ClosableResource, GraphBackendResult},
    services::{HandlerContractViolation, ToolExecutionHandler},
};

use super::helpers::{graph_id, init_tracing, tool_call};

struct CountingResource {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ClosableResource for CountingResource {
    fn name(&self) -> &str {
        "counting-resource"
    }

    async fn close(&self) -> GraphBackendResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn handler_with(
    backend: &InMemoryGraphBackend,
    coordinator: TimeoutCoordinator,
) -> ToolExecutionHandler<InMemoryGraphBackend> {
    init_tracing();
    ToolExecutionHandler::new(
        Arc::new(backend.clone()),
        graph_id(),
        Arc::new(coordinator),
        &DispatchConfig::default(),
    )
}

async fn wait_for_state(
    handler: &ToolExecutionHandler<InMemoryGraphBackend>,
    expected: HandlerLifecycleState,
) {
    for _ in 0..100 {
        if handler.state() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn construction_starts_initialisation_without_a_call() {
    let backend = InMemoryGraphBackend::new();
    let handler = handler_with(&backend, TimeoutCoordinator::new());

    wait_for_state(&handler, HandlerLifecycleState::Ready).await;

    assert_eq!(handler.state(), HandlerLifecycleState::Ready);
    assert_eq!(backend.connect_count(), 1);
    handler.close().await.expect("close should succeed");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn simulated_backend_timeout_returns_text_instead_of_raising() {
    let backend = InMemoryGraphBackend::new();
    backend
        .set_response("read-graph-cypher", Ok(json!({"columns": [], "rows": []})))
        .expect("script");
    backend
        .set_latency("read-graph-cypher", Duration::from_secs(5))
        .expect("latency");
    let coordinator = TimeoutCoordinator::with_overrides(
        &[(
            "read-graph-cypher".to_owned(),
            TimeoutConfiguration {
                endpoint_timeout: Duration::from_millis(400),
                queue_timeout: Duration::from_millis(300),
                tool_timeout: Duration::from_millis(100),
                instance_timeout: Duration::from_millis(50),
            },
        )]
        .into_iter()
        .collect::<HashMap<_, _>>(),
    );
    let handler = handler_with(&backend, coordinator);

    let output = handler
        .call_tool(&tool_call("read-graph-cypher", json!({"query": "MATCH (n) RETURN n"})), None)
        .await
        .expect("timeouts are returned as values");

    assert_eq!(output.failure_kind(), Some(ToolFailureKind::Timeout));
    assert!(output.text().contains("timed out"));
    assert_eq!(handler.state(), HandlerLifecycleState::Ready);
    handler.close().await.expect("close should succeed");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn caller_override_shortens_the_tool_timeout() {
    let backend = InMemoryGraphBackend::new();
    backend
        .set_response("get-graph-info", Ok(json!({"node_count": 1})))
        .expect("script");
    backend
        .set_latency("get-graph-info", Duration::from_millis(500))
        .expect("latency");
    let handler = handler_with(&backend, TimeoutCoordinator::new());

    let output = handler
        .call_tool(
            &tool_call("get-graph-info", json!({})),
            Some(Duration::from_millis(20)),
        )
        .await
        .expect("timeouts are returned as values");

    assert_eq!(output.failure_kind(), Some(ToolFailureKind::Timeout));
    handler.close().await.expect("close should succeed");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn close_releases_client_and_attached_resources_once() {
    let backend = InMemoryGraphBackend::new();
    backend
        .set_response("get-graph-info", Ok(json!({"node_count": 1})))
        .expect("script");
    let handler = handler_with(&backend, TimeoutCoordinator::new());
    let closes = Arc::new(AtomicUsize::new(0));
    handler
        .attach_resource(Box::new(CountingResource {
            closes: Arc::clone(&closes),
        }))
        .expect("attach should succeed");

    let output = handler
        .call_tool(&tool_call("get-graph-info", json!({})), None)
        .await
        .expect("call should succeed");
    assert_eq!(output.content(), Some(&json!({"node_count": 1})));

    handler.close().await.expect("first close");
    handler.close().await.expect("second close is a no-op");

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(backend.close_count(), 1);
    assert!(matches!(
        handler.attach_resource(Box::new(CountingResource { closes })),
        Err(HandlerContractViolation::HandlerClosed { .. })
    ));
}
