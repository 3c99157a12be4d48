use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::error;

use super::{
    ClaimedTask, DEAD_LIST_LIMIT, MaintenanceReport, QueueBackend, QueueError, TaskEnvelope,
};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    active: Vec<(String, DateTime<Utc>)>,
    scheduled: Vec<(String, DateTime<Utc>)>,
    dead: Vec<String>,
    unique: HashMap<String, Instant>,
}

/// In-process queue with the same lifecycle as the Redis backend.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    dead_limit: usize,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::with_dead_limit(DEAD_LIST_LIMIT)
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `dead_limit` dead entries, dropping the oldest first.
    pub fn with_dead_limit(dead_limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            dead_limit,
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn active_len(&self) -> usize {
        self.state.lock().await.active.len()
    }

    pub async fn scheduled_len(&self) -> usize {
        self.state.lock().await.scheduled.len()
    }

    pub async fn pending_tasks(&self) -> Result<Vec<TaskEnvelope>, QueueError> {
        let state = self.state.lock().await;
        state
            .pending
            .iter()
            .map(|raw| TaskEnvelope::decode(raw))
            .collect()
    }

    pub async fn dead_len(&self) -> usize {
        self.state.lock().await.dead.len()
    }

    pub async fn dead_tasks(&self) -> Result<Vec<TaskEnvelope>, QueueError> {
        let state = self.state.lock().await;
        state.dead.iter().map(|raw| TaskEnvelope::decode(raw)).collect()
    }

    fn remove_active(state: &mut QueueState, raw: &str) -> bool {
        match state.active.iter().position(|(entry, _)| entry == raw) {
            Some(index) => {
                state.active.remove(index);
                true
            }
            None => false,
        }
    }

    fn push_dead(&self, state: &mut QueueState, raw: String) {
        state.dead.push(raw);
        if state.dead.len() > self.dead_limit {
            let overflow = state.dead.len() - self.dead_limit;
            state.dead.drain(..overflow);
        }
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn push(
        &self,
        envelope: &TaskEnvelope,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError> {
        let raw = envelope.encode()?;
        let mut state = self.state.lock().await;
        match run_at {
            Some(run_at) if run_at > Utc::now() => state.scheduled.push((raw, run_at)),
            _ => {
                state.pending.push_back(raw);
                self.notify.notify_one();
            }
        }
        Ok(())
    }

    async fn claim(&self, lease_until: DateTime<Utc>) -> Result<Option<ClaimedTask>, QueueError> {
        let mut state = self.state.lock().await;
        while let Some(raw) = state.pending.pop_front() {
            match TaskEnvelope::decode(&raw) {
                Ok(envelope) => {
                    state.active.push((raw.clone(), lease_until));
                    return Ok(Some(ClaimedTask::new(envelope, raw)));
                }
                Err(e) => {
                    error!(error = %e, raw = %raw, "Undecodable task moved to the dead list.");
                    self.push_dead(&mut state, raw);
                }
            }
        }
        Ok(None)
    }

    async fn ack(&self, claimed: &ClaimedTask) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        Self::remove_active(&mut state, claimed.raw());
        Ok(())
    }

    async fn retry(
        &self,
        claimed: &ClaimedTask,
        next: &TaskEnvelope,
        run_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let raw = next.encode()?;
        let mut state = self.state.lock().await;
        Self::remove_active(&mut state, claimed.raw());
        state.scheduled.push((raw, run_at));
        Ok(())
    }

    async fn fail(&self, claimed: &ClaimedTask, dead: &TaskEnvelope) -> Result<(), QueueError> {
        let raw = dead.encode()?;
        let mut state = self.state.lock().await;
        Self::remove_active(&mut state, claimed.raw());
        self.push_dead(&mut state, raw);
        Ok(())
    }

    async fn acquire_unique(&self, key: &str, ttl: Duration) -> Result<bool, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.unique.retain(|_, expires_at| *expires_at > now);
        if state.unique.contains_key(key) {
            return Ok(false);
        }
        state.unique.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn run_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, QueueError> {
        let mut report = MaintenanceReport::default();
        let mut state = self.state.lock().await;

        let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.scheduled)
            .into_iter()
            .partition(|(_, run_at)| *run_at <= now);
        state.scheduled = waiting;
        due.sort_by_key(|(_, run_at)| *run_at);
        for (raw, _) in due {
            state.pending.push_back(raw);
            report.promoted += 1;
        }

        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut state.active)
            .into_iter()
            .partition(|(_, lease_until)| *lease_until <= now);
        state.active = live;
        for (raw, _) in expired {
            state.pending.push_back(raw);
            report.reclaimed += 1;
        }

        if report.promoted + report.reclaimed > 0 {
            self.notify.notify_waiters();
        }
        Ok(report)
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Task;
    use chrono::Duration as ChronoDuration;

    fn lease() -> DateTime<Utc> {
        Utc::now() + ChronoDuration::seconds(60)
    }

    #[tokio::test]
    async fn test_claim_is_fifo_and_ack_removes() {
        let queue = MemoryQueue::new();
        let first = TaskEnvelope::new(Task::ValidateUptime, 0);
        let second = TaskEnvelope::new(Task::ValidateUptime, 0);
        queue.push(&first, None).await.unwrap();
        queue.push(&second, None).await.unwrap();

        let claimed = queue.claim(lease()).await.unwrap().unwrap();
        assert_eq!(claimed.envelope.id, first.id);
        assert_eq!(queue.active_len().await, 1);

        queue.ack(&claimed).await.unwrap();
        assert_eq!(queue.active_len().await, 0);
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_delayed_push_waits_for_maintenance() {
        let queue = MemoryQueue::new();
        let envelope = TaskEnvelope::new(Task::ValidateUptime, 0);
        let run_at = Utc::now() + ChronoDuration::seconds(30);
        queue.push(&envelope, Some(run_at)).await.unwrap();

        assert!(queue.claim(lease()).await.unwrap().is_none());

        let early = queue.run_maintenance(Utc::now()).await.unwrap();
        assert_eq!(early.promoted, 0);

        let report = queue.run_maintenance(run_at).await.unwrap();
        assert_eq!(report.promoted, 1);
        assert_eq!(queue.claim(lease()).await.unwrap().unwrap().envelope.id, envelope.id);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = MemoryQueue::new();
        let envelope = TaskEnvelope::new(Task::ValidateUptime, 0);
        queue.push(&envelope, None).await.unwrap();

        let lease_until = Utc::now() + ChronoDuration::seconds(5);
        let _lost = queue.claim(lease_until).await.unwrap().unwrap();

        // Lease still valid: nothing to reclaim.
        assert_eq!(queue.run_maintenance(Utc::now()).await.unwrap().reclaimed, 0);

        let report = queue
            .run_maintenance(lease_until + ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(queue.active_len().await, 0);

        let again = queue.claim(lease()).await.unwrap().unwrap();
        assert_eq!(again.envelope.id, envelope.id);
    }

    #[tokio::test]
    async fn test_retry_and_fail_transitions() {
        let queue = MemoryQueue::new();
        let envelope = TaskEnvelope::new(Task::ValidateUptime, 1);
        queue.push(&envelope, None).await.unwrap();

        let claimed = queue.claim(lease()).await.unwrap().unwrap();
        let next = claimed.envelope.next_attempt("boom".to_string());
        queue.retry(&claimed, &next, Utc::now()).await.unwrap();
        assert_eq!(queue.active_len().await, 0);
        assert_eq!(queue.scheduled_len().await, 1);

        queue.run_maintenance(Utc::now()).await.unwrap();
        let claimed = queue.claim(lease()).await.unwrap().unwrap();
        assert_eq!(claimed.envelope.attempt, 1);

        queue
            .fail(&claimed, &claimed.envelope.with_error("still broken".to_string()))
            .await
            .unwrap();
        let dead = queue.dead_tasks().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("still broken"));
    }

    #[tokio::test]
    async fn test_undecodable_task_is_dead_lettered() {
        let queue = MemoryQueue::new();
        let valid = TaskEnvelope::new(Task::ValidateUptime, 0);
        queue
            .state
            .lock()
            .await
            .pending
            .push_back(r#"{"id":"x","task":{"kind":"renamed_kind"}}"#.to_string());
        queue.push(&valid, None).await.unwrap();

        let claimed = queue.claim(lease()).await.unwrap().unwrap();
        assert_eq!(claimed.envelope.id, valid.id);
        assert_eq!(queue.dead_len().await, 1);
        assert_eq!(queue.active_len().await, 1);

        queue.ack(&claimed).await.unwrap();
        for _ in 0..3 {
            let report = queue
                .run_maintenance(Utc::now() + ChronoDuration::seconds(120))
                .await
                .unwrap();
            assert_eq!(report.reclaimed, 0);
            assert!(queue.claim(lease()).await.unwrap().is_none());
        }
        assert_eq!(queue.pending_len().await, 0);
        assert_eq!(queue.dead_len().await, 1);
    }

    #[tokio::test]
    async fn test_dead_list_keeps_newest_entries() {
        let queue = MemoryQueue::with_dead_limit(2);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let envelope = TaskEnvelope::new(Task::ValidateUptime, 0);
            ids.push(envelope.id.clone());
            queue.push(&envelope, None).await.unwrap();
            let claimed = queue.claim(lease()).await.unwrap().unwrap();
            queue.fail(&claimed, &claimed.envelope).await.unwrap();
        }

        let dead: Vec<String> = queue
            .dead_tasks()
            .await
            .unwrap()
            .into_iter()
            .map(|envelope| envelope.id)
            .collect();
        assert_eq!(dead, ids[1..].to_vec());
    }

    #[tokio::test]
    async fn test_unique_key_expires() {
        let queue = MemoryQueue::new();
        assert!(queue.acquire_unique("k", Duration::from_millis(50)).await.unwrap());
        assert!(!queue.acquire_unique("k", Duration::from_millis(50)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(queue.acquire_unique("k", Duration::from_millis(50)).await.unwrap());
    }
}
