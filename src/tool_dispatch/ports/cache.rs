//! Result cache port for cacheable tool calls.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Result type for result cache operations.
pub type ToolResultCacheResult<T> = Result<T, ToolResultCacheError>;

/// Cache of successful tool results keyed by call analysis cache keys.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolResultCache: Send + Sync + 'static {
    /// Looks up a cached result.
    async fn get(&self, key: &str) -> ToolResultCacheResult<Option<Value>>;

    /// Stores a successful result.
    async fn put(&self, key: &str, value: Value) -> ToolResultCacheResult<()>;
}

/// Errors returned by result cache adapters.
#[derive(Debug, Clone, Error)]
pub enum ToolResultCacheError {
    /// Cache infrastructure failure.
    #[error("result cache error: {0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),
}

impl ToolResultCacheError {
    /// Wraps a cache infrastructure failure.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Arc::new(err))
    }
}
