use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use thiserror::Error;

use super::types::{BucketUnit, MonitoredEndpoint, ProbeOutcome, UptimeBucket};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Invalid check interval: {0} seconds")]
    InvalidInterval(i32),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Read and bookkeeping access to monitored endpoints.
#[async_trait]
pub trait EndpointRepository: Send + Sync {
    /// All endpoints with `active = true`, joined with their owner's email.
    async fn list_active(&self) -> Result<Vec<MonitoredEndpoint>, RepositoryError>;

    /// Claims the right to run a check for `id` until `until`. Returns `false`
    /// when another check holds an unexpired lease.
    async fn try_acquire_check_lease(
        &self,
        id: i32,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn release_check_lease(&self, id: i32) -> Result<(), RepositoryError>;

    /// Records a completed check and drops the check lease in the same write.
    /// `last_checked` never moves backwards.
    async fn update_last_checked(
        &self,
        id: i32,
        checked_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

/// The append-only probe history.
#[async_trait]
pub trait StatusLogRepository: Send + Sync {
    /// Appends an outcome. Appending the same `(url_id, checked_at)` twice keeps
    /// a single row.
    async fn append(&self, outcome: &ProbeOutcome) -> Result<(), RepositoryError>;

    async fn most_recent(&self, url_id: i32) -> Result<Option<ProbeOutcome>, RepositoryError>;

    async fn aggregate(
        &self,
        url_id: i32,
        unit: BucketUnit,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UptimeBucket>, RepositoryError>;
}
