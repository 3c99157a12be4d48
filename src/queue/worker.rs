use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, warn};

use super::{Backoff, ClaimedTask, QueueBackend, QueueError};
use crate::logging::task_span;
use crate::tasks::{Task, TaskError};

/// Executes one task. Implemented by the task handler; the pool only decides
/// what happens to the task afterwards.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &Task, shutdown: watch::Receiver<bool>) -> Result<(), TaskError>;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    /// How long a claimed task may stay active before it is handed out again.
    pub task_lease: Duration,
    /// Longest an idle worker sleeps before polling again.
    pub idle_wait: Duration,
    pub maintenance_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            task_lease: Duration::from_secs(120),
            idle_wait: Duration::from_millis(500),
            maintenance_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Retrying { attempt: u32, delay: Duration },
    /// Interrupted by shutdown and put back without spending an attempt.
    Requeued,
    Dead,
}

pub struct WorkerPool {
    backend: Arc<dyn QueueBackend>,
    config: WorkerPoolConfig,
    backoff: Backoff,
}

impl WorkerPool {
    pub fn new(backend: Arc<dyn QueueBackend>, config: WorkerPoolConfig) -> Self {
        Self {
            backend,
            config,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs the workers and the maintenance loop until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, runner: Arc<dyn TaskRunner>, shutdown: watch::Receiver<bool>) {
        info!(
            concurrency = self.config.concurrency,
            "Worker pool started."
        );

        let mut handles = Vec::with_capacity(self.config.concurrency + 1);
        handles.push(tokio::spawn(
            self.clone().maintenance_loop(shutdown.clone()),
        ));
        for worker_id in 0..self.config.concurrency {
            handles.push(tokio::spawn(self.clone().worker_loop(
                worker_id,
                runner.clone(),
                shutdown.clone(),
            )));
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked.");
            }
        }
        info!("Worker pool stopped.");
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        runner: Arc<dyn TaskRunner>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.process_next(runner.as_ref(), shutdown.clone()).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    tokio::select! {
                        biased;
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = self.backend.wait_for_work(self.config.idle_wait) => {}
                    }
                }
                Err(e) => {
                    error!(worker_id, error = %e, "Queue operation failed. Backing off.");
                    tokio::select! {
                        biased;
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        debug!(worker_id, "Worker stopped.");
    }

    /// Claims and runs a single task. Returns `None` when nothing was pending.
    pub async fn process_next(
        &self,
        runner: &dyn TaskRunner,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Option<TaskOutcome>, QueueError> {
        let lease = chrono::Duration::from_std(self.config.task_lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let Some(claimed) = self.backend.claim(Utc::now() + lease).await? else {
            return Ok(None);
        };

        let envelope = &claimed.envelope;
        let span = task_span(&envelope.id, envelope.task.kind(), envelope.attempt);
        let result = runner
            .run(&envelope.task, shutdown)
            .instrument(span.clone())
            .await;
        let outcome = self.finish(&claimed, result).instrument(span).await?;
        Ok(Some(outcome))
    }

    async fn finish(
        &self,
        claimed: &ClaimedTask,
        result: Result<(), TaskError>,
    ) -> Result<TaskOutcome, QueueError> {
        let envelope = &claimed.envelope;
        match result {
            Ok(()) => {
                self.backend.ack(claimed).await?;
                debug!("Task completed.");
                Ok(TaskOutcome::Completed)
            }
            Err(TaskError::Cancelled) => {
                self.backend.retry(claimed, envelope, Utc::now()).await?;
                warn!("Task interrupted by shutdown. Re-queued.");
                Ok(TaskOutcome::Requeued)
            }
            Err(e) if envelope.has_retries_left() && !e.is_permanent() => {
                let delay = self.backoff.delay(envelope.attempt);
                let next = envelope.next_attempt(e.to_string());
                let run_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                self.backend.retry(claimed, &next, run_at).await?;
                warn!(
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    retries_left = next.max_retry - next.attempt,
                    "Task failed. Scheduled for retry."
                );
                Ok(TaskOutcome::Retrying {
                    attempt: next.attempt,
                    delay,
                })
            }
            Err(e) => {
                self.backend
                    .fail(claimed, &envelope.with_error(e.to_string()))
                    .await?;
                error!(
                    error = %e,
                    attempt = envelope.attempt,
                    max_retry = envelope.max_retry,
                    "Task failed permanently."
                );
                Ok(TaskOutcome::Dead)
            }
        }
    }

    async fn maintenance_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.maintenance_interval);
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.backend.run_maintenance(Utc::now()).await {
                        Ok(report) if report.reclaimed > 0 => {
                            warn!(
                                reclaimed = report.reclaimed,
                                promoted = report.promoted,
                                "Re-queued tasks whose lease expired."
                            );
                        }
                        Ok(report) if report.promoted > 0 => {
                            debug!(promoted = report.promoted, "Promoted scheduled tasks.");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Queue maintenance failed."),
                    }
                }
            }
        }
    }
}
