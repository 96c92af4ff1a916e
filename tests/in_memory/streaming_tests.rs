//! In-memory integration tests for streamed delivery.

use std::time::Duration;

use futures::StreamExt;
use rstest::rstest;
use serde_json::{Value, json};
use toolcall_dispatch::tool_dispatch::{
    config::DispatchConfig,
    domain::{
        ExecutionStrategy, FormatOverride, SelectionOptions, StreamEvent, StreamEventKind,
    },
    services::{DispatchBody, ResultAggregator},
};

use super::helpers::{TestContext, context, dispatch_request, graph_id, tool_call};

fn with_format(format: FormatOverride) -> SelectionOptions {
    SelectionOptions {
        format: Some(format),
        test_mode: false,
    }
}

fn ndjson_events(lines: &[String]) -> Vec<StreamEvent> {
    lines
        .iter()
        .map(|line| serde_json::from_str(line.trim_end()).expect("line should be one event"))
        .collect()
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn ndjson_lines_aggregate_to_the_buffered_result(context: TestContext) {
    let rows: Vec<Value> = (0..230).map(|id| json!({"id": id})).collect();
    let content = json!({"columns": ["id"], "rows": rows});
    context
        .backend
        .set_response("read-graph-cypher", Ok(content.clone()))
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(
            dispatch_request("read-graph-cypher", json!({"query": "MATCH (n) RETURN n LIMIT 500"}))
                .with_options(with_format(FormatOverride::Ndjson)),
        )
        .await
        .expect("dispatch should succeed");
    assert_eq!(response.strategy, ExecutionStrategy::StreamAggregated);

    let DispatchBody::Ndjson(lines) = response.body else {
        panic!("expected an NDJSON body");
    };
    let lines: Vec<String> = lines.collect().await;
    assert!(lines.iter().all(|line| line.ends_with('\n')));

    let events = ndjson_events(&lines);
    let chunk_count = events
        .iter()
        .filter(|event| event.kind() == StreamEventKind::QueryChunk)
        .count();
    assert_eq!(chunk_count, 3);
    assert_eq!(
        ResultAggregator::aggregate(&events).content(),
        Some(&content)
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn sse_frames_carry_event_names_and_json_payloads(context: TestContext) {
    context
        .backend
        .set_response(
            "get-graph-schema",
            Ok(json!({"nodes": [{"label": "Person"}], "relationships": [{"type": "KNOWS"}]})),
        )
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(
            dispatch_request("get-graph-schema", json!({}))
                .with_options(with_format(FormatOverride::Sse)),
        )
        .await
        .expect("dispatch should succeed");

    let DispatchBody::Sse(frames) = response.body else {
        panic!("expected an SSE body");
    };
    let frames: Vec<_> = frames.collect().await;
    let names: Vec<&str> = frames.iter().map(|frame| frame.event.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "start",
            "schema_nodes",
            "progress",
            "schema_relationships",
            "complete"
        ]
    );

    let nodes_frame = frames
        .iter()
        .find(|frame| frame.event == "schema_nodes")
        .expect("nodes frame should exist");
    let payload: Value = serde_json::from_str(&nodes_frame.data).expect("data should be JSON");
    assert_eq!(payload, json!({"nodes": [{"label": "Person"}]}));
    assert!(nodes_frame.to_wire().starts_with("event: schema_nodes\ndata: "));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn dropping_a_stream_early_releases_the_handler(context: TestContext) {
    context
        .backend
        .set_response("get-graph-info", Ok(json!({"node_count": 1})))
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(
            dispatch_request("get-graph-info", json!({}))
                .with_options(with_format(FormatOverride::Sse)),
        )
        .await
        .expect("dispatch should succeed");
    let DispatchBody::Sse(mut frames) = response.body else {
        panic!("expected an SSE body");
    };
    let first = frames.next().await.expect("start frame");
    assert_eq!(first.event, "start");
    drop(frames);

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(context.backend.connect_count(), context.backend.close_count());
    let counters = context.breaker.counters(&graph_id(), tool_call("get-graph-info", json!({})).name());
    assert_eq!(counters.successes + counters.failures, 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn paced_description_round_trips() {
    let context = TestContext::with_config(
        DispatchConfig::default().with_description_pacing(Some(Duration::from_millis(2))),
    );
    let description = "Graph overview\n\nPeople and companies\n\nEmployment edges";
    context
        .backend
        .set_response("get-graph-description", Ok(json!(description)))
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(
            dispatch_request("get-graph-description", json!({}))
                .with_options(with_format(FormatOverride::Ndjson)),
        )
        .await
        .expect("dispatch should succeed");
    let DispatchBody::Ndjson(lines) = response.body else {
        panic!("expected an NDJSON body");
    };
    let events = ndjson_events(&lines.collect::<Vec<_>>().await);

    let sections = events
        .iter()
        .filter(|event| event.kind() == StreamEventKind::DescriptionSection)
        .count();
    assert_eq!(sections, 3);
    assert_eq!(
        ResultAggregator::aggregate(&events).content(),
        Some(&json!(description))
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failing_backend_stream_ends_with_error_and_records_failure(context: TestContext) {
    context
        .backend
        .set_response(
            "read-graph-cypher",
            Err(toolcall_dispatch::tool_dispatch::ports::GraphBackendError::ConstraintViolation(
                "query exceeds the complexity budget".to_owned(),
            )),
        )
        .expect("script");

    let response = context
        .dispatcher
        .dispatch(
            dispatch_request("read-graph-cypher", json!({"query": "MATCH (n) RETURN n"}))
                .with_options(with_format(FormatOverride::Ndjson)),
        )
        .await
        .expect("dispatch should succeed");
    let DispatchBody::Ndjson(lines) = response.body else {
        panic!("expected an NDJSON body");
    };
    let events = ndjson_events(&lines.collect::<Vec<_>>().await);

    let kinds: Vec<StreamEventKind> = events.iter().map(StreamEvent::kind).collect();
    assert_eq!(kinds, vec![StreamEventKind::Start, StreamEventKind::Error]);
    let counters = context
        .breaker
        .counters(&graph_id(), tool_call("read-graph-cypher", json!({})).name());
    assert_eq!(counters.failures, 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn caller_timeout_override_bounds_streamed_calls(context: TestContext) {
    context
        .backend
        .set_response("read-graph-cypher", Ok(json!({"columns": ["n"], "rows": [[1]]})))
        .expect("script");
    context
        .backend
        .set_latency("read-graph-cypher", Duration::from_secs(5))
        .expect("latency");

    let response = context
        .dispatcher
        .dispatch(
            dispatch_request("read-graph-cypher", json!({"query": "MATCH (n) RETURN n"}))
                .with_options(with_format(FormatOverride::Sse))
                .with_timeout_override(Duration::from_millis(50)),
        )
        .await
        .expect("dispatch should succeed");
    let DispatchBody::Sse(frames) = response.body else {
        panic!("expected an SSE body");
    };

    let frames = tokio::time::timeout(Duration::from_secs(2), frames.collect::<Vec<_>>())
        .await
        .expect("the override should end the stream well before the backend answers");
    let names: Vec<&str> = frames.iter().map(|frame| frame.event.as_str()).collect();
    assert_eq!(names, vec!["start", "error"]);
    let last = frames.last().expect("error frame");
    let payload: Value = serde_json::from_str(&last.data).expect("JSON payload");
    assert!(
        payload["message"]
            .as_str()
            .is_some_and(|message| message.contains("timed out"))
    );
    let counters = context
        .breaker
        .counters(&graph_id(), tool_call("read-graph-cypher", json!({})).name());
    assert_eq!(counters.failures, 1);
}
