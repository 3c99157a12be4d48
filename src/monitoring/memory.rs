//! In-process repositories. Used by the test suites and by single-node runs
//! without Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::repository::{EndpointRepository, RepositoryError, StatusLogRepository};
use super::types::{
    BucketUnit, MonitoredEndpoint, ProbeOutcome, UptimeBucket, aggregate_outcomes,
    is_allowed_interval,
};

struct EndpointRecord {
    endpoint: MonitoredEndpoint,
    lease_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryEndpointRepository {
    records: Mutex<HashMap<i32, EndpointRecord>>,
    fail_updates: AtomicBool,
}

impl MemoryEndpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, endpoint: MonitoredEndpoint) -> Result<(), RepositoryError> {
        if !is_allowed_interval(endpoint.interval_seconds) {
            return Err(RepositoryError::InvalidInterval(endpoint.interval_seconds));
        }
        self.records.lock().await.insert(
            endpoint.id,
            EndpointRecord {
                endpoint,
                lease_until: None,
            },
        );
        Ok(())
    }

    pub async fn get(&self, id: i32) -> Option<MonitoredEndpoint> {
        self.records
            .lock()
            .await
            .get(&id)
            .map(|record| record.endpoint.clone())
    }

    pub async fn lease_until(&self, id: i32) -> Option<DateTime<Utc>> {
        self.records
            .lock()
            .await
            .get(&id)
            .and_then(|record| record.lease_until)
    }

    /// Makes subsequent `update_last_checked` calls fail.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EndpointRepository for MemoryEndpointRepository {
    async fn list_active(&self) -> Result<Vec<MonitoredEndpoint>, RepositoryError> {
        let records = self.records.lock().await;
        let mut endpoints: Vec<MonitoredEndpoint> = records
            .values()
            .filter(|record| record.endpoint.active)
            .map(|record| record.endpoint.clone())
            .collect();
        endpoints.sort_by_key(|endpoint| endpoint.id);
        Ok(endpoints)
    }

    async fn try_acquire_check_lease(
        &self,
        id: i32,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("endpoint {id}")))?;

        match record.lease_until {
            Some(held_until) if held_until > now => Ok(false),
            _ => {
                record.lease_until = Some(until);
                Ok(true)
            }
        }
    }

    async fn release_check_lease(&self, id: i32) -> Result<(), RepositoryError> {
        if let Some(record) = self.records.lock().await.get_mut(&id) {
            record.lease_until = None;
        }
        Ok(())
    }

    async fn update_last_checked(
        &self,
        id: i32,
        checked_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "endpoint store rejected the update".to_string(),
            ));
        }
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("endpoint {id}")))?;

        record.endpoint.last_checked = match record.endpoint.last_checked {
            Some(previous) if previous > checked_at => Some(previous),
            _ => Some(checked_at),
        };
        record.lease_until = None;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStatusLogRepository {
    logs: Mutex<Vec<ProbeOutcome>>,
    fail_appends: AtomicBool,
}

impl MemoryStatusLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_for(&self, url_id: i32) -> Vec<ProbeOutcome> {
        self.logs
            .lock()
            .await
            .iter()
            .filter(|outcome| outcome.url_id == url_id)
            .cloned()
            .collect()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusLogRepository for MemoryStatusLogRepository {
    async fn append(&self, outcome: &ProbeOutcome) -> Result<(), RepositoryError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "status log rejected the append".to_string(),
            ));
        }
        let mut logs = self.logs.lock().await;
        let duplicate = logs.iter().any(|existing| {
            existing.url_id == outcome.url_id && existing.checked_at == outcome.checked_at
        });
        if !duplicate {
            logs.push(outcome.clone());
        }
        Ok(())
    }

    async fn most_recent(&self, url_id: i32) -> Result<Option<ProbeOutcome>, RepositoryError> {
        let logs = self.logs.lock().await;
        Ok(logs
            .iter()
            .filter(|outcome| outcome.url_id == url_id)
            .max_by_key(|outcome| outcome.checked_at)
            .cloned())
    }

    async fn aggregate(
        &self,
        url_id: i32,
        unit: BucketUnit,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UptimeBucket>, RepositoryError> {
        let logs = self.logs.lock().await;
        Ok(aggregate_outcomes(
            logs.iter().filter(|outcome| outcome.url_id == url_id),
            unit,
            start,
            end,
        ))
    }
}
