//! Streaming event protocol.
//!
//! Events serialise as `{"event": <kind>, "data": <payload>}`, which maps
//! directly onto both Server-Sent Events frames and NDJSON lines.

use super::{ExecutionStrategy, OperationId, ToolFailureKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One unit of a streamed tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event of every stream.
    Start {
        /// Tool being executed.
        tool_name: String,
        /// Strategy the stream was produced for.
        strategy: ExecutionStrategy,
        /// Time the stream started.
        started_at: DateTime<Utc>,
    },
    /// Progress report.
    Progress {
        /// Completion percentage in `0..=100`.
        percent: u8,
        /// Human-readable progress note.
        message: String,
    },
    /// A batch of query result rows.
    QueryChunk {
        /// Zero-based chunk number.
        chunk_index: usize,
        /// Column headers; present on the first chunk only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        columns: Option<Value>,
        /// Rows in this chunk.
        rows: Vec<Value>,
    },
    /// Summary of a chunked query result.
    QueryComplete {
        /// Total number of rows emitted.
        total_rows: usize,
        /// Total number of chunks emitted.
        total_chunks: usize,
    },
    /// Node section of a schema result.
    SchemaNodes {
        /// Node definitions.
        nodes: Value,
    },
    /// Relationship section of a schema result.
    SchemaRelationships {
        /// Relationship definitions.
        relationships: Value,
    },
    /// One paragraph of a textual description.
    DescriptionSection {
        /// Zero-based section number.
        index: usize,
        /// Section text.
        section: String,
        /// Completion percentage after this section.
        progress: u8,
    },
    /// A complete, unsplit result.
    Result {
        /// Result content.
        result: Value,
    },
    /// Terminal failure.
    Error {
        /// Failure class.
        kind: ToolFailureKind,
        /// User-facing failure message.
        message: String,
    },
    /// Last event of a successful stream.
    Complete {
        /// Time the stream completed.
        completed_at: DateTime<Utc>,
        /// Milliseconds since the stream started.
        elapsed_ms: u64,
    },
    /// Status of a queued operation.
    QueueStatus {
        /// Queue-assigned operation identifier.
        operation_id: OperationId,
        /// Operation status name.
        status: String,
        /// Position in the queue while pending.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
}

/// Discriminant of a [`StreamEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEventKind {
    /// See [`StreamEvent::Start`].
    Start,
    /// See [`StreamEvent::Progress`].
    Progress,
    /// See [`StreamEvent::QueryChunk`].
    QueryChunk,
    /// See [`StreamEvent::QueryComplete`].
    QueryComplete,
    /// See [`StreamEvent::SchemaNodes`].
    SchemaNodes,
    /// See [`StreamEvent::SchemaRelationships`].
    SchemaRelationships,
    /// See [`StreamEvent::DescriptionSection`].
    DescriptionSection,
    /// See [`StreamEvent::Result`].
    Result,
    /// See [`StreamEvent::Error`].
    Error,
    /// See [`StreamEvent::Complete`].
    Complete,
    /// See [`StreamEvent::QueueStatus`].
    QueueStatus,
}

impl StreamEventKind {
    /// Returns the wire name used as the SSE `event` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Progress => "progress",
            Self::QueryChunk => "query_chunk",
            Self::QueryComplete => "query_complete",
            Self::SchemaNodes => "schema_nodes",
            Self::SchemaRelationships => "schema_relationships",
            Self::DescriptionSection => "description_section",
            Self::Result => "result",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::QueueStatus => "queue_status",
        }
    }
}

impl fmt::Display for StreamEventKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One Server-Sent Events frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseFrame {
    /// Event name.
    pub event: String,
    /// JSON-encoded payload.
    pub data: String,
}

impl SseFrame {
    /// Renders the frame in `text/event-stream` wire format.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let mut wire = format!("event: {}\n", self.event);
        for line in self.data.lines() {
            wire.push_str("data: ");
            wire.push_str(line);
            wire.push('\n');
        }
        wire.push('\n');
        wire
    }
}

impl StreamEvent {
    /// Creates an error event.
    #[must_use]
    pub fn error(kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// Creates a progress event.
    #[must_use]
    pub fn progress(percent: u8, message: impl Into<String>) -> Self {
        Self::Progress {
            percent: percent.min(100),
            message: message.into(),
        }
    }

    /// Returns the event discriminant.
    #[must_use]
    pub const fn kind(&self) -> StreamEventKind {
        match self {
            Self::Start { .. } => StreamEventKind::Start,
            Self::Progress { .. } => StreamEventKind::Progress,
            Self::QueryChunk { .. } => StreamEventKind::QueryChunk,
            Self::QueryComplete { .. } => StreamEventKind::QueryComplete,
            Self::SchemaNodes { .. } => StreamEventKind::SchemaNodes,
            Self::SchemaRelationships { .. } => StreamEventKind::SchemaRelationships,
            Self::DescriptionSection { .. } => StreamEventKind::DescriptionSection,
            Self::Result { .. } => StreamEventKind::Result,
            Self::Error { .. } => StreamEventKind::Error,
            Self::Complete { .. } => StreamEventKind::Complete,
            Self::QueueStatus { .. } => StreamEventKind::QueueStatus,
        }
    }

    /// Returns whether this is an error event.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Converts the event into an SSE frame.
    ///
    /// # Errors
    ///
    /// Returns a serialisation error if the payload cannot be encoded.
    pub fn to_sse_frame(&self) -> Result<SseFrame, serde_json::Error> {
        let encoded = serde_json::to_value(self)?;
        let data = encoded.get("data").cloned().unwrap_or(Value::Null);
        Ok(SseFrame {
            event: self.kind().as_str().to_owned(),
            data: serde_json::to_string(&data)?,
        })
    }

    /// Converts the event into one NDJSON line, including the trailing
    /// newline.
    ///
    /// # Errors
    ///
    /// Returns a serialisation error if the event cannot be encoded.
    pub fn to_ndjson_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
