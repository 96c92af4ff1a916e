//! In-memory tool result cache adapter.

use crate::tool_dispatch::ports::{ToolResultCache, ToolResultCacheError, ToolResultCacheResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Unbounded in-memory result cache.
#[derive(Debug, Clone, Default)]
pub struct InMemoryToolResultCache {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

fn lock_error(err: impl ToString) -> ToolResultCacheError {
    ToolResultCacheError::backend(std::io::Error::other(err.to_string()))
}

impl InMemoryToolResultCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of cached entries.
    ///
    /// # Errors
    ///
    /// Returns cache errors when lock acquisition fails.
    pub fn entry_count(&self) -> ToolResultCacheResult<usize> {
        let entries = self.entries.read().map_err(lock_error)?;
        Ok(entries.len())
    }
}

#[async_trait]
impl ToolResultCache for InMemoryToolResultCache {
    async fn get(&self, key: &str) -> ToolResultCacheResult<Option<Value>> {
        let entries = self.entries.read().map_err(lock_error)?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> ToolResultCacheResult<()> {
        let mut entries = self.entries.write().map_err(lock_error)?;
        entries.insert(key.to_owned(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stored_values_are_returned() {
        let cache = InMemoryToolResultCache::new();
        assert_eq!(cache.get("k").await.expect("get"), None);

        cache.put("k", json!({"labels": ["Person"]})).await.expect("put");

        assert_eq!(
            cache.get("k").await.expect("get"),
            Some(json!({"labels": ["Person"]}))
        );
        assert_eq!(cache.entry_count().expect("entry count"), 1);
    }
}
