//! In-memory integration tests for end-to-end dispatch.

use std::time::Duration;

use futures::StreamExt;
use rstest::rstest;
use serde_json::{Value, json};
use toolcall_dispatch::tool_dispatch::{
    domain::{
        ACCEPT_HEADER, ExecutionStrategy, MCP_CLIENT_HEADER, RequestHeaders, SSE_MEDIA_TYPE,
        SelectionOptions, SystemStateSnapshot, ToolFailureKind, ToolOutput, USER_AGENT_HEADER,
    },
    ports::{GraphBackendError, QueuedOperationStatus},
    services::{DispatchBody, DispatchError},
};

use super::helpers::{TestContext, context, dispatch_request, graph_id, tool_call};

fn mcp_headers() -> RequestHeaders {
    RequestHeaders::new()
        .with(USER_AGENT_HEADER, "claude-desktop/0.9")
        .with(MCP_CLIENT_HEADER, "1")
}

fn browser_headers() -> RequestHeaders {
    RequestHeaders::new()
        .with(USER_AGENT_HEADER, "Mozilla/5.0 (X11; Linux x86_64)")
        .with(ACCEPT_HEADER, SSE_MEDIA_TYPE)
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn info_tool_on_idle_system_is_answered_immediately(context: TestContext) {
    context
        .backend
        .set_response("get-graph-info", Ok(json!({"node_count": 12, "edge_count": 30})))
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(dispatch_request("get-graph-info", json!({})))
        .await
        .expect("dispatch should succeed");

    assert_eq!(response.strategy, ExecutionStrategy::JsonImmediate);
    assert_eq!(response.timeout, Duration::from_secs(30));
    assert_eq!(
        response.body.json_document(),
        Some(json!({"result": {"node_count": 12, "edge_count": 30}}))
    );
    assert_eq!(context.backend.close_count(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn unbounded_query_from_mcp_client_is_stream_aggregated(context: TestContext) {
    let rows: Vec<Value> = (0..150).map(|id| json!([id])).collect();
    context
        .backend
        .set_response("read-graph-cypher", Ok(json!({"columns": ["id"], "rows": rows.clone()})))
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(
            dispatch_request("read-graph-cypher", json!({"query": "MATCH (n) RETURN n"}))
                .with_headers(mcp_headers()),
        )
        .await
        .expect("dispatch should succeed");

    assert_eq!(response.strategy, ExecutionStrategy::StreamAggregated);
    assert_eq!(
        response.body.json_document(),
        Some(json!({"result": {"columns": ["id"], "rows": rows}}))
    );
    assert_eq!(context.backend.close_count(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn overloaded_system_queues_with_monitoring(context: TestContext) {
    context
        .queue
        .script_statuses([
            QueuedOperationStatus::Pending { position: 3 },
            QueuedOperationStatus::Running,
            QueuedOperationStatus::Completed(ToolOutput::success(json!({"rows": [[1]]}))),
        ])
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(
            dispatch_request("read-graph-cypher", json!({"query": "MATCH (n) RETURN n"}))
                .with_headers(mcp_headers())
                .with_system_state(SystemStateSnapshot::new(15, 0, false)),
        )
        .await
        .expect("dispatch should succeed");

    assert_eq!(response.strategy, ExecutionStrategy::QueueWithMonitoring);
    assert_eq!(response.timeout, Duration::from_secs(600));
    let DispatchBody::Sse(frames) = response.body else {
        panic!("expected an SSE body");
    };
    let frames: Vec<_> = frames.collect().await;
    let names: Vec<&str> = frames.iter().map(|frame| frame.event.as_str()).collect();
    assert_eq!(
        names,
        vec!["start", "queue_status", "queue_status", "queue_status", "result"]
    );

    let queued = context.queue.enqueued().expect("enqueued calls");
    assert_eq!(queued.len(), 1);
    assert_eq!(queued.first().map(|call| call.queue_timeout), Some(Duration::from_secs(25)));
    let counters = context
        .breaker
        .counters(&graph_id(), tool_call("read-graph-cypher", json!({})).name());
    assert_eq!(counters.successes, 1);
    assert_eq!(context.backend.connect_count(), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_queued_operation_ends_with_error_frame(context: TestContext) {
    context
        .queue
        .script_statuses([QueuedOperationStatus::Failed("worker crashed".to_owned())])
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(
            dispatch_request("get-graph-info", json!({}))
                .with_headers(browser_headers())
                .with_system_state(SystemStateSnapshot::new(0, 8, false)),
        )
        .await
        .expect("dispatch should succeed");

    let DispatchBody::Sse(frames) = response.body else {
        panic!("expected an SSE body");
    };
    let last = frames.collect::<Vec<_>>().await.pop().expect("frames");
    assert_eq!(last.event, "error");
    let payload: Value = serde_json::from_str(&last.data).expect("JSON payload");
    assert_eq!(payload["message"], json!("worker crashed"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn bounded_query_is_answered_immediately(context: TestContext) {
    context
        .backend
        .set_response("read-graph-cypher", Ok(json!({"columns": ["n"], "rows": []})))
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(dispatch_request(
            "read-graph-cypher",
            json!({"query": "MATCH (n:Person) RETURN n LIMIT 50"}),
        ))
        .await
        .expect("dispatch should succeed");

    assert_eq!(response.strategy, ExecutionStrategy::JsonImmediate);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn browser_gets_progress_events_for_large_queries(context: TestContext) {
    context
        .backend
        .set_response("read-graph-cypher", Ok(json!({"columns": ["n"], "rows": [[1], [2]]})))
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(
            dispatch_request("read-graph-cypher", json!({"query": "MATCH (n) RETURN n"}))
                .with_headers(browser_headers()),
        )
        .await
        .expect("dispatch should succeed");

    assert_eq!(response.strategy, ExecutionStrategy::SseProgress);
    assert_eq!(response.body.media_type(), SSE_MEDIA_TYPE);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_mode_forces_buffered_json(context: TestContext) {
    context
        .backend
        .set_response("read-graph-cypher", Ok(json!({"columns": ["n"], "rows": [[1]]})))
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(
            dispatch_request("read-graph-cypher", json!({"query": "MATCH (n) RETURN n"}))
                .with_headers(browser_headers())
                .with_options(SelectionOptions {
                    format: None,
                    test_mode: true,
                }),
        )
        .await
        .expect("dispatch should succeed");

    assert_eq!(response.strategy, ExecutionStrategy::JsonComplete);
    assert_eq!(response.timeout, Duration::from_secs(120));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn repeated_failures_open_the_circuit(context: TestContext) {
    context
        .backend
        .set_response(
            "get-graph-info",
            Err(GraphBackendError::Connection("graph instance unreachable".to_owned())),
        )
        .expect("script");

    for _ in 0..2 {
        let response = context
            .dispatcher
            .dispatch(dispatch_request("get-graph-info", json!({})))
            .await
            .expect("backend failures are carried in the body");
        let document = response.body.json_document().expect("JSON body");
        assert_eq!(
            document["result"]["kind"],
            json!(ToolFailureKind::Unexpected.as_str())
        );
    }

    let refused = context
        .dispatcher
        .dispatch(dispatch_request("get-graph-info", json!({})))
        .await;
    assert!(matches!(refused, Err(DispatchError::CircuitOpen(_))));
    assert_eq!(context.backend.call_count(), 2);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cached_schema_is_served_from_cache_on_second_call(context: TestContext) {
    let schema = json!({"nodes": [{"label": "Person"}], "relationships": []});
    context
        .backend
        .set_response("get-graph-schema", Ok(schema.clone()))
        .expect("script");
    let request = dispatch_request("get-graph-schema", json!({}))
        .with_system_state(SystemStateSnapshot::new(0, 0, true));

    for _ in 0..2 {
        let response = context
            .dispatcher
            .dispatch(request.clone())
            .await
            .expect("dispatch should succeed");
        assert_eq!(response.strategy, ExecutionStrategy::SchemaCached);
        assert_eq!(
            response.body.json_document(),
            Some(json!({"result": schema}))
        );
    }

    assert_eq!(context.backend.call_count(), 1);
    assert_eq!(context.cache.entry_count().expect("entry count"), 1);
}
