//! Durable task queue: backends, the typed client, the worker pool and the
//! recurring scheduler.
//!
//! Task lifecycle: `Pending -> Active -> (Completed | RetryPending -> Pending | Failed)`.
//! A claimed task carries a lease; if the worker disappears before acking, the
//! maintenance pass puts the task back into `Pending`, so delivery is at least once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::tasks::Task;

pub mod backoff;
pub mod client;
pub mod memory;
pub mod redis;
pub mod scheduler;
pub mod worker;

pub use backoff::Backoff;
pub use client::{TaskEnqueuer, TaskQueue};
pub use memory::MemoryQueue;
pub use redis::RedisQueue;
pub use scheduler::CronScheduler;
pub use worker::{TaskOutcome, TaskRunner, WorkerPool, WorkerPoolConfig};

pub type TaskId = String;

/// Dead tasks kept for inspection.
pub const DEAD_LIST_LIMIT: usize = 10_000;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("Failed to create Redis pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Task already queued: {0}")]
    Duplicate(String),
    #[error("Invalid schedule {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// How a task is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Retries allowed after the first attempt.
    pub max_retry: u32,
    /// Delay before the task first becomes claimable.
    pub delay: Duration,
    /// When set, an identical task enqueued within this window is rejected.
    pub unique_for: Option<Duration>,
}

/// What is actually stored in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: TaskId,
    pub task: Task,
    /// Number of failed attempts so far.
    pub attempt: u32,
    pub max_retry: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl TaskEnvelope {
    pub fn new(task: Task, max_retry: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task,
            attempt: 0,
            max_retry,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn has_retries_left(&self) -> bool {
        self.attempt < self.max_retry
    }

    pub fn next_attempt(&self, error: String) -> Self {
        Self {
            attempt: self.attempt + 1,
            last_error: Some(error),
            ..self.clone()
        }
    }

    pub fn with_error(&self, error: String) -> Self {
        Self {
            last_error: Some(error),
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Result<String, QueueError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, QueueError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A task handed to one worker. `raw` is the exact stored form, which the
/// backend uses to locate the entry again on ack, retry or fail.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub envelope: TaskEnvelope,
    raw: String,
}

impl ClaimedTask {
    pub(crate) fn new(envelope: TaskEnvelope, raw: String) -> Self {
        Self { envelope, raw }
    }

    pub(crate) fn raw(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Scheduled entries moved to pending.
    pub promoted: u64,
    /// Active entries with an expired lease moved back to pending.
    pub reclaimed: u64,
}

/// Storage operations the client, workers and scheduler are built on.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Stores a new task. With `run_at` in the future it stays scheduled until then.
    async fn push(
        &self,
        envelope: &TaskEnvelope,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError>;

    /// Moves the oldest pending task to active under a lease.
    async fn claim(&self, lease_until: DateTime<Utc>) -> Result<Option<ClaimedTask>, QueueError>;

    async fn ack(&self, claimed: &ClaimedTask) -> Result<(), QueueError>;

    /// Replaces the active entry with `next`, claimable again at `run_at`.
    async fn retry(
        &self,
        claimed: &ClaimedTask,
        next: &TaskEnvelope,
        run_at: DateTime<Utc>,
    ) -> Result<(), QueueError>;

    /// Moves the active entry to the dead list as `dead`.
    async fn fail(&self, claimed: &ClaimedTask, dead: &TaskEnvelope) -> Result<(), QueueError>;

    /// Sets `key` if absent, expiring after `ttl`. Returns whether it was set.
    async fn acquire_unique(&self, key: &str, ttl: Duration) -> Result<bool, QueueError>;

    async fn run_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, QueueError>;

    /// Parks an idle worker. Backends that can signal new work return early.
    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_retry_bookkeeping() {
        let envelope = TaskEnvelope::new(Task::ValidateUptime, 2);
        assert!(envelope.has_retries_left());

        let second = envelope.next_attempt("boom".to_string());
        assert_eq!(second.id, envelope.id);
        assert_eq!(second.attempt, 1);
        assert_eq!(second.last_error.as_deref(), Some("boom"));
        assert!(second.has_retries_left());

        let third = second.next_attempt("boom again".to_string());
        assert!(!third.has_retries_left());
    }

    #[test]
    fn test_envelope_codec() {
        let envelope = TaskEnvelope::new(Task::ValidateUptime, 0);
        let raw = envelope.encode().unwrap();
        assert_eq!(TaskEnvelope::decode(&raw).unwrap(), envelope);
        assert!(matches!(
            TaskEnvelope::decode("{not json"),
            Err(QueueError::Serialization(_))
        ));
    }
}
