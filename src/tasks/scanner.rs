use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::types::{CheckPayload, Task};
use crate::monitoring::{EndpointRepository, RepositoryError};
use crate::queue::{QueueError, TaskEnqueuer};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub active: usize,
    pub due: usize,
    pub enqueued: usize,
    pub already_queued: usize,
    pub failed: usize,
}

/// Finds endpoints whose interval has elapsed and enqueues one check for each.
pub struct DueEndpointScanner {
    endpoints: Arc<dyn EndpointRepository>,
    queue: Arc<dyn TaskEnqueuer>,
}

impl DueEndpointScanner {
    pub fn new(endpoints: Arc<dyn EndpointRepository>, queue: Arc<dyn TaskEnqueuer>) -> Self {
        Self { endpoints, queue }
    }

    /// One scan pass. A failing enqueue is logged and skipped so the remaining
    /// endpoints still get their checks; only a failed listing aborts the pass.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<ScanReport, RepositoryError> {
        let endpoints = self.endpoints.list_active().await?;
        let mut report = ScanReport {
            active: endpoints.len(),
            ..Default::default()
        };

        for endpoint in endpoints.iter().filter(|endpoint| endpoint.is_due(now)) {
            report.due += 1;
            let task = Task::CheckUptime(CheckPayload::from(endpoint));
            match self.queue.enqueue(task).await {
                Ok(task_id) => {
                    report.enqueued += 1;
                    debug!(url_id = endpoint.id, url = %endpoint.url, task_id = %task_id, "Check enqueued.");
                }
                Err(QueueError::Duplicate(_)) => {
                    report.already_queued += 1;
                    debug!(url_id = endpoint.id, url = %endpoint.url, "Check already queued.");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(url_id = endpoint.id, url = %endpoint.url, error = %e, "Failed to enqueue check.");
                }
            }
        }

        info!(
            active = report.active,
            due = report.due,
            enqueued = report.enqueued,
            already_queued = report.already_queued,
            failed = report.failed,
            "Scan finished."
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::MonitoredEndpoint;
    use crate::monitoring::memory::MemoryEndpointRepository;
    use crate::queue::{EnqueueOptions, MemoryQueue, TaskId, TaskQueue};
    use async_trait::async_trait;
    use chrono::Duration;
    use uuid::Uuid;

    fn endpoint(id: i32, interval_seconds: i32, last_checked: Option<DateTime<Utc>>) -> MonitoredEndpoint {
        MonitoredEndpoint {
            id,
            public_id: Uuid::new_v4(),
            user_id: 1,
            owner_email: "owner@example.com".to_string(),
            label: format!("site-{id}"),
            url: format!("https://site-{id}.example.com"),
            interval_seconds,
            active: true,
            last_checked,
            created_at: Utc::now(),
        }
    }

    /// Rejects checks for one URL and forwards everything else.
    struct FailingFor {
        url_id: i32,
        inner: TaskQueue,
    }

    #[async_trait]
    impl TaskEnqueuer for FailingFor {
        async fn enqueue_with(
            &self,
            task: Task,
            options: EnqueueOptions,
        ) -> Result<TaskId, QueueError> {
            if let Task::CheckUptime(payload) = &task {
                if payload.url_id == self.url_id {
                    return Err(QueueError::Unavailable("broker unreachable".to_string()));
                }
            }
            self.inner.enqueue_with(task, options).await
        }
    }

    fn queued_ids(tasks: &[crate::queue::TaskEnvelope]) -> Vec<i32> {
        let mut ids: Vec<i32> = tasks
            .iter()
            .filter_map(|envelope| match &envelope.task {
                Task::CheckUptime(payload) => Some(payload.url_id),
                _ => None,
            })
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_scan_selects_due_endpoints() {
        let now = Utc::now();
        let repo = Arc::new(MemoryEndpointRepository::new());
        repo.insert(endpoint(1, 300, Some(now - Duration::seconds(301)))).await.unwrap();
        repo.insert(endpoint(2, 300, Some(now - Duration::seconds(299)))).await.unwrap();
        repo.insert(endpoint(3, 60, None)).await.unwrap();
        let mut paused = endpoint(4, 60, None);
        paused.active = false;
        repo.insert(paused).await.unwrap();

        let backend = Arc::new(MemoryQueue::new());
        let scanner = DueEndpointScanner::new(repo, Arc::new(TaskQueue::new(backend.clone())));

        let report = scanner.scan(now).await.unwrap();

        assert_eq!(report.active, 3);
        assert_eq!(report.due, 2);
        assert_eq!(report.enqueued, 2);
        assert_eq!(queued_ids(&backend.pending_tasks().await.unwrap()), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_enqueue_failure_does_not_stop_scan() {
        let repo = Arc::new(MemoryEndpointRepository::new());
        for id in 1..=3 {
            repo.insert(endpoint(id, 60, None)).await.unwrap();
        }
        let backend = Arc::new(MemoryQueue::new());
        let queue = Arc::new(FailingFor {
            url_id: 2,
            inner: TaskQueue::new(backend.clone()),
        });
        let scanner = DueEndpointScanner::new(repo, queue);

        let report = scanner.scan(Utc::now()).await.unwrap();

        assert_eq!(report.due, 3);
        assert_eq!(report.enqueued, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(queued_ids(&backend.pending_tasks().await.unwrap()), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_repeated_scan_does_not_duplicate_backlog() {
        let repo = Arc::new(MemoryEndpointRepository::new());
        repo.insert(endpoint(1, 60, None)).await.unwrap();
        let backend = Arc::new(MemoryQueue::new());
        let scanner = DueEndpointScanner::new(repo, Arc::new(TaskQueue::new(backend.clone())));

        scanner.scan(Utc::now()).await.unwrap();
        let second = scanner.scan(Utc::now()).await.unwrap();

        assert_eq!(second.already_queued, 1);
        assert_eq!(backend.pending_len().await, 1);
    }
}
