//! In-memory job queue adapter.

use crate::tool_dispatch::{
    domain::OperationId,
    ports::{JobQueue, JobQueueError, JobQueueResult, QueuedOperationStatus, QueuedToolCall},
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// In-memory job queue.
///
/// Every operation replays a status script. Each `status` call pops the
/// next scripted status; the last one sticks. Without a script an operation
/// reports `pending` at its enqueue position forever.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<RwLock<InMemoryQueueState>>,
}

#[derive(Debug, Default)]
struct InMemoryQueueState {
    script: Vec<QueuedOperationStatus>,
    rejection: Option<String>,
    enqueued: Vec<QueuedToolCall>,
    operations: HashMap<OperationId, OperationProgress>,
}

#[derive(Debug)]
struct OperationProgress {
    position: usize,
    remaining: VecDeque<QueuedOperationStatus>,
}

fn lock_error(err: impl ToString) -> JobQueueError {
    JobQueueError::backend(std::io::Error::other(err.to_string()))
}

impl InMemoryJobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status script replayed by operations enqueued afterwards.
    ///
    /// # Errors
    ///
    /// Returns queue errors when lock acquisition fails.
    pub fn script_statuses(
        &self,
        statuses: impl IntoIterator<Item = QueuedOperationStatus>,
    ) -> JobQueueResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        state.script = statuses.into_iter().collect();
        Ok(())
    }

    /// Makes subsequent enqueue attempts fail with the given reason.
    ///
    /// # Errors
    ///
    /// Returns queue errors when lock acquisition fails.
    pub fn reject_with(&self, reason: impl Into<String>) -> JobQueueResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        state.rejection = Some(reason.into());
        Ok(())
    }

    /// Returns every call accepted so far, in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns queue errors when lock acquisition fails.
    pub fn enqueued(&self) -> JobQueueResult<Vec<QueuedToolCall>> {
        let state = self.state.read().map_err(lock_error)?;
        Ok(state.enqueued.clone())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, call: &QueuedToolCall) -> JobQueueResult<OperationId> {
        let mut state = self.state.write().map_err(lock_error)?;
        if let Some(reason) = state.rejection.clone() {
            return Err(JobQueueError::Rejected(reason));
        }

        let operation_id = OperationId::new();
        let progress = OperationProgress {
            position: state.enqueued.len(),
            remaining: state.script.iter().cloned().collect(),
        };
        state.enqueued.push(call.clone());
        state.operations.insert(operation_id, progress);
        Ok(operation_id)
    }

    async fn status(&self, operation_id: OperationId) -> JobQueueResult<QueuedOperationStatus> {
        let mut state = self.state.write().map_err(lock_error)?;
        let progress = state
            .operations
            .get_mut(&operation_id)
            .ok_or(JobQueueError::UnknownOperation(operation_id))?;

        let status = if progress.remaining.len() > 1 {
            progress.remaining.pop_front()
        } else {
            progress.remaining.front().cloned()
        };
        Ok(status.unwrap_or(QueuedOperationStatus::Pending {
            position: progress.position,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_dispatch::domain::{GraphId, ToolCall, ToolOutput};
    use serde_json::{Map, json};
    use std::time::Duration;

    fn queued_call() -> QueuedToolCall {
        QueuedToolCall {
            tool_call: ToolCall::named("read-graph-cypher", Map::new()).expect("valid tool call"),
            graph_id: GraphId::new("kg1").expect("valid graph id"),
            user_tier: None,
            queue_timeout: Duration::from_secs(25),
            instance_timeout: Duration::from_secs(15),
        }
    }

    #[tokio::test]
    async fn status_script_is_replayed_and_last_status_sticks() {
        let queue = InMemoryJobQueue::new();
        let done = QueuedOperationStatus::Completed(ToolOutput::success(json!({"rows": []})));
        queue
            .script_statuses([QueuedOperationStatus::Running, done.clone()])
            .expect("script should succeed");

        let operation_id = queue
            .enqueue(&queued_call())
            .await
            .expect("enqueue should succeed");

        assert_eq!(
            queue.status(operation_id).await.expect("status"),
            QueuedOperationStatus::Running
        );
        assert_eq!(queue.status(operation_id).await.expect("status"), done);
        assert_eq!(queue.status(operation_id).await.expect("status"), done);
    }

    #[tokio::test]
    async fn unscripted_operations_stay_pending_at_their_position() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(&queued_call()).await.expect("first enqueue");
        let second = queue.enqueue(&queued_call()).await.expect("second enqueue");

        assert_eq!(
            queue.status(second).await.expect("status"),
            QueuedOperationStatus::Pending { position: 1 }
        );
        assert_eq!(queue.enqueued().expect("enqueued").len(), 2);
    }

    #[tokio::test]
    async fn rejection_and_unknown_operations_are_errors() {
        let queue = InMemoryJobQueue::new();
        let unknown = queue.status(OperationId::new()).await;
        assert!(matches!(unknown, Err(JobQueueError::UnknownOperation(_))));

        queue.reject_with("queue full").expect("reject should succeed");
        let rejected = queue.enqueue(&queued_call()).await;
        assert!(matches!(rejected, Err(JobQueueError::Rejected(reason)) if reason == "queue full"));
    }
}
