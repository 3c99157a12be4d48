use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{EnqueueOptions, QueueBackend, QueueError, TaskEnvelope, TaskId};
use crate::tasks::Task;

/// Producer side of the queue, as seen by the scanner, dispatcher and scheduler.
#[async_trait]
pub trait TaskEnqueuer: Send + Sync {
    async fn enqueue_with(&self, task: Task, options: EnqueueOptions)
    -> Result<TaskId, QueueError>;

    /// Enqueues with the task kind's default options.
    async fn enqueue(&self, task: Task) -> Result<TaskId, QueueError> {
        let options = task.default_options();
        self.enqueue_with(task, options).await
    }
}

/// Dedup key for a task: its kind plus a digest of its serialized payload.
pub fn unique_key(task: &Task) -> Result<String, QueueError> {
    let body = serde_json::to_vec(task)?;
    Ok(format!(
        "{}:{}",
        task.kind(),
        Uuid::new_v5(&Uuid::NAMESPACE_OID, &body)
    ))
}

/// Typed client over a `QueueBackend`.
#[derive(Clone)]
pub struct TaskQueue {
    backend: Arc<dyn QueueBackend>,
}

impl TaskQueue {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn QueueBackend> {
        self.backend.clone()
    }

    pub async fn acquire_unique(&self, key: &str, ttl: Duration) -> Result<bool, QueueError> {
        self.backend.acquire_unique(key, ttl).await
    }
}

#[async_trait]
impl TaskEnqueuer for TaskQueue {
    async fn enqueue_with(
        &self,
        task: Task,
        options: EnqueueOptions,
    ) -> Result<TaskId, QueueError> {
        if let Some(ttl) = options.unique_for {
            let key = unique_key(&task)?;
            if !self.backend.acquire_unique(&key, ttl).await? {
                return Err(QueueError::Duplicate(key));
            }
        }

        let kind = task.kind();
        let envelope = TaskEnvelope::new(task, options.max_retry);
        let run_at = if options.delay.is_zero() {
            None
        } else {
            chrono::Duration::from_std(options.delay)
                .ok()
                .map(|delay| Utc::now() + delay)
        };

        self.backend.push(&envelope, run_at).await?;
        debug!(task_id = %envelope.id, kind, max_retry = options.max_retry, "Task enqueued.");
        Ok(envelope.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::tasks::CheckPayload;

    fn check_task(last_checked_offset: i64) -> Task {
        Task::CheckUptime(CheckPayload {
            url_id: 1,
            public_id: Uuid::nil(),
            label: "Home".to_string(),
            url: "https://example.com".to_string(),
            interval_seconds: 60,
            owner_email: "owner@example.com".to_string(),
            last_checked: chrono::DateTime::from_timestamp(1_700_000_000 + last_checked_offset, 0),
        })
    }

    #[tokio::test]
    async fn test_enqueue_returns_id_and_stores_options() {
        let backend = Arc::new(MemoryQueue::new());
        let queue = TaskQueue::new(backend.clone());

        let id = queue.enqueue(Task::ValidateUptime).await.unwrap();

        let pending = backend.pending_tasks().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].max_retry, 0);
        assert_eq!(pending[0].attempt, 0);
    }

    #[tokio::test]
    async fn test_unique_tasks_are_deduplicated() {
        let backend = Arc::new(MemoryQueue::new());
        let queue = TaskQueue::new(backend.clone());

        queue.enqueue(check_task(0)).await.unwrap();
        let second = queue.enqueue(check_task(0)).await;
        assert!(matches!(second, Err(QueueError::Duplicate(_))));

        // A different snapshot is a different task.
        queue.enqueue(check_task(60)).await.unwrap();
        assert_eq!(backend.pending_len().await, 2);
    }

    #[tokio::test]
    async fn test_delayed_enqueue_is_scheduled() {
        let backend = Arc::new(MemoryQueue::new());
        let queue = TaskQueue::new(backend.clone());

        queue
            .enqueue_with(
                Task::ValidateUptime,
                EnqueueOptions {
                    max_retry: 1,
                    delay: Duration::from_secs(30),
                    unique_for: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(backend.pending_len().await, 0);
        assert_eq!(backend.scheduled_len().await, 1);
    }

    #[test]
    fn test_unique_key_is_stable() {
        let a = unique_key(&check_task(0)).unwrap();
        let b = unique_key(&check_task(0)).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("check_uptime:"));
        assert_ne!(a, unique_key(&check_task(1)).unwrap());
    }
}
