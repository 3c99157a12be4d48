use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::join_all;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{QueueError, TaskEnqueuer, TaskId, TaskQueue};
use crate::tasks::Task;

/// How long the per-occurrence lock lives. Longer than any tick spacing a
/// minute-level schedule produces.
const OCCURRENCE_LOCK_TTL: Duration = Duration::from_secs(65);

#[derive(Clone)]
struct CronEntry {
    expression: String,
    schedule: Schedule,
    task: Task,
}

/// Enqueues registered tasks on their cron schedules.
///
/// Missed occurrences are not replayed: each loop waits for the next occurrence
/// after the current time. Several scheduler processes may run side by side;
/// a per-occurrence lock lets only one of them enqueue.
pub struct CronScheduler {
    queue: TaskQueue,
    entries: Vec<CronEntry>,
}

impl CronScheduler {
    pub fn new(queue: TaskQueue) -> Self {
        Self {
            queue,
            entries: Vec::new(),
        }
    }

    /// Registers `task` under a six-field cron expression (seconds first).
    pub fn register(&mut self, expression: &str, task: Task) -> Result<(), QueueError> {
        let schedule =
            Schedule::from_str(expression).map_err(|e| QueueError::InvalidSchedule {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        self.register_schedule(expression, schedule, task);
        Ok(())
    }

    pub fn register_schedule(&mut self, expression: &str, schedule: Schedule, task: Task) {
        info!(schedule = expression, kind = task.kind(), "Registered recurring task.");
        self.entries.push(CronEntry {
            expression: expression.to_string(),
            schedule,
            task,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueues the task for one occurrence unless another scheduler already did.
    async fn fire(&self, task: &Task, occurrence: DateTime<Utc>) -> Result<Option<TaskId>, QueueError> {
        let lock_key = format!("cron:{}:{}", task.kind(), occurrence.timestamp());
        if !self.queue.acquire_unique(&lock_key, OCCURRENCE_LOCK_TTL).await? {
            return Ok(None);
        }
        self.queue.enqueue(task.clone()).await.map(Some)
    }

    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        if self.entries.is_empty() {
            warn!("Scheduler started without registrations.");
        }
        let handles: Vec<_> = (0..self.entries.len())
            .map(|index| tokio::spawn(self.clone().entry_loop(index, shutdown.clone())))
            .collect();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Scheduler loop panicked.");
            }
        }
        info!("Scheduler stopped.");
    }

    async fn entry_loop(self: Arc<Self>, index: usize, mut shutdown: watch::Receiver<bool>) {
        let Some(entry) = self.entries.get(index).cloned() else {
            return;
        };

        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = Utc::now();
            let Some(next) = entry.schedule.after(&now).next() else {
                warn!(schedule = %entry.expression, "Schedule has no upcoming occurrence.");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.fire(&entry.task, next).await {
                Ok(Some(task_id)) => {
                    info!(kind = entry.task.kind(), task_id = %task_id, occurrence = %next, "Recurring task enqueued.");
                }
                Ok(None) => {
                    debug!(kind = entry.task.kind(), occurrence = %next, "Occurrence already fired elsewhere.");
                }
                Err(e) => {
                    error!(kind = entry.task.kind(), occurrence = %next, error = %e, "Failed to enqueue recurring task.");
                }
            }
        }
    }
}
