//! Cost and shape estimation for a single tool call.

use super::{ToolCategory, ToolName};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

const SMALL_RESULT_LIMIT: u64 = 100;
const MEDIUM_RESULT_LIMIT: u64 = 1000;

const QUERY_DURATION: Duration = Duration::from_secs(2);
const TRAVERSAL_QUERY_DURATION: Duration = Duration::from_secs(10);
const SCHEMA_DURATION: Duration = Duration::from_secs(1);
const INFO_DURATION: Duration = Duration::from_millis(500);
const UNKNOWN_DURATION: Duration = Duration::from_secs(5);

#[expect(
    clippy::expect_used,
    reason = "patterns are compile-time constants covered by unit tests"
)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static query pattern must compile")
}

static LIMIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)\blimit\s+(\d+)"));
static MATCH_PATTERN: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)\bmatch\b"));
static AGGREGATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\b(count|sum|avg|min|max|collect)\s*\("));
static UNRESTRICTED_TRAVERSAL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\[[^\]]*\*[^\]]*\]|shortestpath"));

/// Estimated size of a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSize {
    /// At most 100 rows.
    Small,
    /// At most 1000 rows.
    Medium,
    /// More than 1000 rows, or unbounded.
    Large,
}

impl ResultSize {
    /// Classifies a row limit.
    #[must_use]
    pub const fn from_limit(limit: u64) -> Self {
        if limit <= SMALL_RESULT_LIMIT {
            Self::Small
        } else if limit <= MEDIUM_RESULT_LIMIT {
            Self::Medium
        } else {
            Self::Large
        }
    }

    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for ResultSize {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Estimated cost and shape of one tool call.
///
/// Analysis is deterministic in `(tool_name, arguments)` and never fails;
/// missing or malformed query text degrades to the conservative estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallAnalysis {
    /// Category of the tool.
    pub tool_category: ToolCategory,
    /// Whether the result may be served from cache.
    pub is_cacheable: bool,
    /// Estimated result size.
    pub estimated_result_size: ResultSize,
    /// Whether the result should be streamed rather than buffered.
    pub requires_streaming: bool,
    /// Whether the tool can report incremental progress.
    pub supports_progress: bool,
    /// Rough expected execution time.
    pub estimated_duration: Duration,
    /// Stable cache key, present only for cacheable calls.
    pub cache_key: Option<String>,
}

impl ToolCallAnalysis {
    /// Analyses a tool call.
    #[must_use]
    pub fn analyze(tool_name: &ToolName, arguments: &Map<String, Value>) -> Self {
        let tool_category = tool_name.category();
        let is_cacheable = tool_category.is_cacheable();
        let cache_key = is_cacheable.then(|| cache_key(tool_name, arguments));
        let supports_progress = tool_category.supports_progress();

        match tool_category {
            ToolCategory::Query => {
                let shape = QueryShape::from_arguments(arguments);
                Self {
                    tool_category,
                    is_cacheable,
                    estimated_result_size: shape.result_size(),
                    requires_streaming: shape.requires_streaming(),
                    supports_progress,
                    estimated_duration: shape.estimated_duration(),
                    cache_key,
                }
            }
            ToolCategory::Schema => Self {
                tool_category,
                is_cacheable,
                estimated_result_size: ResultSize::Medium,
                requires_streaming: false,
                supports_progress,
                estimated_duration: SCHEMA_DURATION,
                cache_key,
            },
            ToolCategory::Info => Self {
                tool_category,
                is_cacheable,
                estimated_result_size: ResultSize::Small,
                requires_streaming: false,
                supports_progress,
                estimated_duration: INFO_DURATION,
                cache_key,
            },
            ToolCategory::Unknown => Self {
                tool_category,
                is_cacheable,
                estimated_result_size: ResultSize::Medium,
                requires_streaming: false,
                supports_progress,
                estimated_duration: UNKNOWN_DURATION,
                cache_key,
            },
        }
    }
}

/// Features extracted from query text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct QueryShape {
    limit: Option<u64>,
    has_limit_clause: bool,
    has_match: bool,
    has_aggregation: bool,
    has_unrestricted_traversal: bool,
    is_missing: bool,
}

impl QueryShape {
    fn from_arguments(arguments: &Map<String, Value>) -> Self {
        let text = arguments
            .get("query")
            .or_else(|| arguments.get("cypher"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty());

        text.map_or(
            Self {
                is_missing: true,
                ..Self::default()
            },
            Self::from_text,
        )
    }

    fn from_text(text: &str) -> Self {
        let last_limit = LIMIT_PATTERN
            .captures_iter(text)
            .last()
            .and_then(|captures| captures.get(1));

        Self {
            // A limit too large for u64 stays `None` and classifies as large.
            limit: last_limit.and_then(|digits| digits.as_str().parse().ok()),
            has_limit_clause: last_limit.is_some(),
            has_match: MATCH_PATTERN.is_match(text),
            has_aggregation: AGGREGATION_PATTERN.is_match(text),
            has_unrestricted_traversal: UNRESTRICTED_TRAVERSAL_PATTERN.is_match(text),
            is_missing: false,
        }
    }

    fn result_size(self) -> ResultSize {
        self.limit.map_or(ResultSize::Large, ResultSize::from_limit)
    }

    const fn requires_streaming(self) -> bool {
        if self.is_missing {
            return true;
        }
        self.has_match && !self.has_limit_clause && !self.has_aggregation
    }

    const fn estimated_duration(self) -> Duration {
        if self.has_unrestricted_traversal {
            TRAVERSAL_QUERY_DURATION
        } else {
            QUERY_DURATION
        }
    }
}

fn cache_key(tool_name: &ToolName, arguments: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_str().as_bytes());
    hasher.update(b"\n");
    // `Map` keeps keys sorted, so the rendering is canonical.
    hasher.update(Value::Object(arguments.clone()).to_string().as_bytes());

    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut hex, byte| {
            hex.push_str(&format!("{byte:02x}"));
            hex
        })
}
