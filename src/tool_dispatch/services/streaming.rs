//! Streaming event production and re-aggregation.
//!
//! [`StreamEventProducer`] turns one tool call into a finite event stream
//! whose body depends on the tool category and the shape of the result.
//! [`ResultAggregator`] folds such a stream back into the [`ToolOutput`] a
//! direct call would have returned.

use super::handler::ToolExecutionHandler;
use crate::tool_dispatch::{
    config::DispatchConfig,
    domain::{ExecutionStrategy, StreamEvent, ToolCall, ToolCategory, ToolFailureKind, ToolOutput},
    ports::GraphBackend,
};
use async_stream::stream;
use futures::stream::{BoxStream, Stream, StreamExt};
use mockable::Clock;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Separator between description sections.
pub const SECTION_SEPARATOR: &str = "\n\n";

const UNAGGREGATABLE: &str = "unable to aggregate stream events";

/// Body layout settings shared by every produced stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BodySettings {
    chunk_size: usize,
    progress_every: usize,
    pacing: Option<Duration>,
}

type BodyBuilder = fn(Value, &BodySettings) -> Vec<StreamEvent>;

/// Produces streamed tool responses.
#[derive(Debug)]
pub struct StreamEventProducer<C>
where
    C: Clock + Send + Sync,
{
    clock: Arc<C>,
    settings: BodySettings,
}

impl<C> Clone for StreamEventProducer<C>
where
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            clock: Arc::clone(&self.clock),
            settings: self.settings,
        }
    }
}

impl<C> StreamEventProducer<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Creates a producer using the chunking and pacing settings of
    /// `config`.
    #[must_use]
    pub fn new(clock: Arc<C>, config: &DispatchConfig) -> Self {
        Self {
            clock,
            settings: BodySettings {
                chunk_size: config.effective_chunk_size(),
                progress_every: config.effective_progress_every(),
                pacing: config.description_pacing,
            },
        }
    }

    /// Streams the execution of `tool_call` through `handler`.
    ///
    /// The stream always starts with `start`. It ends with `complete` on
    /// success, or with a single `error` event as soon as anything fails.
    /// The handler is not closed by the stream. `timeout_override` is
    /// handed to [`ToolExecutionHandler::call_tool`] unchanged.
    pub fn produce<B: GraphBackend>(
        &self,
        handler: Arc<ToolExecutionHandler<B>>,
        tool_call: ToolCall,
        timeout_override: Option<Duration>,
        strategy: ExecutionStrategy,
    ) -> BoxStream<'static, StreamEvent> {
        let clock = Arc::clone(&self.clock);
        let settings = self.settings;

        Box::pin(stream! {
            let started_at = clock.utc();
            yield StreamEvent::Start {
                tool_name: tool_call.name().as_str().to_owned(),
                strategy,
                started_at,
            };

            let output = match handler.call_tool(&tool_call, timeout_override).await {
                Ok(output) => output,
                Err(violation) => {
                    yield StreamEvent::error(ToolFailureKind::Unexpected, violation.to_string());
                    return;
                }
            };
            let content = match output {
                ToolOutput::Success { content } => content,
                ToolOutput::Failure { kind, message } => {
                    yield StreamEvent::error(kind, message);
                    return;
                }
            };

            let build = body_builder(tool_call.name().category());
            let mut sections_sent = 0_usize;
            for event in build(content, &settings) {
                if let (StreamEvent::DescriptionSection { .. }, Some(delay)) = (&event, settings.pacing) {
                    if sections_sent > 0 {
                        tokio::time::sleep(delay).await;
                    }
                    sections_sent += 1;
                }
                yield event;
            }

            let completed_at = clock.utc();
            let elapsed_ms = u64::try_from((completed_at - started_at).num_milliseconds()).unwrap_or(0);
            yield StreamEvent::Complete {
                completed_at,
                elapsed_ms,
            };
        })
    }
}

fn body_builder(category: ToolCategory) -> BodyBuilder {
    match category {
        ToolCategory::Query => query_body,
        ToolCategory::Schema => schema_body,
        ToolCategory::Info => description_body,
        ToolCategory::Unknown => generic_body,
    }
}

/// Returns whether `content` is an object with exactly the two given keys.
fn object_with_keys(content: &Value, first: &str, second: &str) -> bool {
    content
        .as_object()
        .is_some_and(|object| object.len() == 2 && object.contains_key(first) && object.contains_key(second))
}

fn percent_of(done: usize, total: usize) -> u8 {
    let percent = done.saturating_mul(100).checked_div(total).unwrap_or(100);
    u8::try_from(percent).unwrap_or(100).min(100)
}

fn query_body(content: Value, settings: &BodySettings) -> Vec<StreamEvent> {
    let rows_are_array = content.get("rows").is_some_and(Value::is_array);
    if !rows_are_array || !object_with_keys(&content, "columns", "rows") {
        return generic_body(content, settings);
    }
    let Value::Object(mut object) = content else {
        return Vec::new();
    };
    let columns = object.remove("columns").unwrap_or(Value::Null);
    let rows = match object.remove("rows") {
        Some(Value::Array(rows)) => rows,
        _ => Vec::new(),
    };

    let total_rows = rows.len();
    let mut chunks: Vec<Vec<Value>> = rows
        .chunks(settings.chunk_size)
        .map(<[Value]>::to_vec)
        .collect();
    if chunks.is_empty() {
        chunks.push(Vec::new());
    }
    let total_chunks = chunks.len();

    let mut events = Vec::with_capacity(total_chunks.saturating_add(2));
    let mut columns = Some(columns);
    for (chunk_index, chunk) in chunks.into_iter().enumerate() {
        events.push(StreamEvent::QueryChunk {
            chunk_index,
            columns: columns.take(),
            rows: chunk,
        });
        let emitted = chunk_index + 1;
        if emitted.checked_rem(settings.progress_every) == Some(0) {
            events.push(StreamEvent::progress(
                percent_of(emitted, total_chunks),
                format!("streamed {emitted} of {total_chunks} chunks"),
            ));
        }
    }
    events.push(StreamEvent::QueryComplete {
        total_rows,
        total_chunks,
    });
    events
}

fn schema_body(content: Value, settings: &BodySettings) -> Vec<StreamEvent> {
    if !object_with_keys(&content, "nodes", "relationships") {
        return generic_body(content, settings);
    }
    let Value::Object(mut object) = content else {
        return Vec::new();
    };
    vec![
        StreamEvent::SchemaNodes {
            nodes: object.remove("nodes").unwrap_or(Value::Null),
        },
        StreamEvent::progress(50, "schema nodes streamed"),
        StreamEvent::SchemaRelationships {
            relationships: object.remove("relationships").unwrap_or(Value::Null),
        },
    ]
}

fn description_body(content: Value, settings: &BodySettings) -> Vec<StreamEvent> {
    let text = match content {
        Value::String(text) => text,
        other => return generic_body(other, settings),
    };
    let sections: Vec<&str> = text.split(SECTION_SEPARATOR).collect();
    let total = sections.len();
    sections
        .into_iter()
        .enumerate()
        .map(|(index, section)| StreamEvent::DescriptionSection {
            index,
            section: section.to_owned(),
            progress: percent_of(index + 1, total),
        })
        .collect()
}

fn generic_body(content: Value, _settings: &BodySettings) -> Vec<StreamEvent> {
    vec![
        StreamEvent::progress(50, "processing result"),
        StreamEvent::Result { result: content },
    ]
}

/// Folds streamed events back into a single [`ToolOutput`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    /// Reconstructs the result carried by `events`.
    ///
    /// An `error` event wins over everything else. Otherwise query chunks,
    /// schema sections, description sections and a plain `result` event are
    /// tried in that order.
    #[must_use]
    pub fn aggregate(events: &[StreamEvent]) -> ToolOutput {
        if let Some(StreamEvent::Error { kind, message }) =
            events.iter().find(|event| event.is_error())
        {
            return ToolOutput::failure(*kind, message.clone());
        }

        aggregate_query(events)
            .or_else(|| aggregate_schema(events))
            .or_else(|| aggregate_description(events))
            .or_else(|| aggregate_result(events))
            .map_or_else(
                || ToolOutput::failure(ToolFailureKind::Unexpected, UNAGGREGATABLE),
                ToolOutput::success,
            )
    }

    /// Drains `stream` and aggregates its events.
    pub async fn aggregate_stream<S>(stream: S) -> ToolOutput
    where
        S: Stream<Item = StreamEvent> + Send,
    {
        let events: Vec<StreamEvent> = stream.collect().await;
        Self::aggregate(&events)
    }
}

fn aggregate_query(events: &[StreamEvent]) -> Option<Value> {
    let mut columns = None;
    let mut rows = Vec::new();
    let mut seen = false;
    for event in events {
        if let StreamEvent::QueryChunk {
            columns: chunk_columns,
            rows: chunk_rows,
            ..
        } = event
        {
            seen = true;
            if columns.is_none() {
                columns.clone_from(chunk_columns);
            }
            rows.extend(chunk_rows.iter().cloned());
        }
    }
    seen.then(|| json!({ "columns": columns.unwrap_or(Value::Null), "rows": rows }))
}

fn aggregate_schema(events: &[StreamEvent]) -> Option<Value> {
    let mut schema = Map::new();
    for event in events {
        match event {
            StreamEvent::SchemaNodes { nodes } => {
                schema.insert("nodes".to_owned(), nodes.clone());
            }
            StreamEvent::SchemaRelationships { relationships } => {
                schema.insert("relationships".to_owned(), relationships.clone());
            }
            _ => {}
        }
    }
    if schema.is_empty() {
        return None;
    }
    schema.entry("nodes").or_insert(Value::Null);
    schema.entry("relationships").or_insert(Value::Null);
    Some(Value::Object(schema))
}

fn aggregate_description(events: &[StreamEvent]) -> Option<Value> {
    let mut sections: Vec<(usize, &str)> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::DescriptionSection { index, section, .. } => Some((*index, section.as_str())),
            _ => None,
        })
        .collect();
    if sections.is_empty() {
        return None;
    }
    sections.sort_by_key(|(index, _)| *index);
    let joined: Vec<&str> = sections.into_iter().map(|(_, section)| section).collect();
    Some(Value::String(joined.join(SECTION_SEPARATOR)))
}

fn aggregate_result(events: &[StreamEvent]) -> Option<Value> {
    events.iter().find_map(|event| match event {
        StreamEvent::Result { result } => Some(result.clone()),
        _ => None,
    })
}
