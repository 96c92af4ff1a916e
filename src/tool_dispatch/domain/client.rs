//! Caller capability detection from request headers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header carrying the caller's user agent.
pub const USER_AGENT_HEADER: &str = "user-agent";
/// Header that explicitly identifies an MCP client.
pub const MCP_CLIENT_HEADER: &str = "x-mcp-client";
/// Header listing accepted response media types.
pub const ACCEPT_HEADER: &str = "accept";

/// Media type for Server-Sent Events.
pub const SSE_MEDIA_TYPE: &str = "text/event-stream";
/// Media type for newline-delimited JSON.
pub const NDJSON_MEDIA_TYPE: &str = "application/x-ndjson";

const MCP_USER_AGENT_MARKERS: &[&str] = &["mcp", "claude", "anthropic", "cline", "cursor"];
const TESTING_TOOL_MARKERS: &[&str] = &["postman", "insomnia", "curl", "httpie", "thunder client"];
const BROWSER_MARKER: &str = "mozilla";

/// Request headers with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    values: HashMap<String, String>,
}

impl RequestHeaders {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header, replacing any previous value with the same name.
    #[must_use]
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts a header, replacing any previous value with the same name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.values
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Returns a header value by case-insensitive name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn get_lowercase(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_ascii_lowercase()
    }
}

impl<K, V> FromIterator<(K, V)> for RequestHeaders
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Capability classification of the caller, derived purely from headers.
///
/// Every flag defaults to `false` when the relevant headers are absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "each flag is an independent capability reported to the selector"
)]
pub struct ClientProfile {
    /// The caller is an agent-style MCP client.
    pub is_mcp_client: bool,
    /// The caller can consume Server-Sent Events.
    pub supports_sse: bool,
    /// The caller can consume newline-delimited JSON.
    pub supports_ndjson: bool,
    /// The caller asked for a streaming media type.
    pub prefers_streaming: bool,
    /// The caller is a web browser.
    pub is_browser: bool,
    /// The caller is an API testing tool such as Postman or curl.
    pub is_testing_tool: bool,
    /// The caller is driven by a human (browser or testing tool).
    pub is_interactive: bool,
}

impl ClientProfile {
    /// Classifies the caller from its request headers.
    #[must_use]
    pub fn detect(headers: &RequestHeaders) -> Self {
        let user_agent = headers.get_lowercase(USER_AGENT_HEADER);
        let accept = headers.get_lowercase(ACCEPT_HEADER);

        let has_client_header = headers
            .get(MCP_CLIENT_HEADER)
            .is_some_and(|value| !value.trim().is_empty());
        let is_mcp_client = has_client_header || contains_any(&user_agent, MCP_USER_AGENT_MARKERS);

        let is_testing_tool = contains_any(&user_agent, TESTING_TOOL_MARKERS);
        let is_browser = !is_testing_tool && user_agent.contains(BROWSER_MARKER);

        let accepts_sse = accept.contains(SSE_MEDIA_TYPE);
        let accepts_ndjson = accept.contains(NDJSON_MEDIA_TYPE);

        Self {
            is_mcp_client,
            supports_sse: accepts_sse || is_mcp_client,
            supports_ndjson: accepts_ndjson || is_mcp_client,
            prefers_streaming: accepts_sse || accepts_ndjson,
            is_browser,
            is_testing_tool,
            is_interactive: is_browser || is_testing_tool,
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
