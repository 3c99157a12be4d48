//! Append-only probe history and uptime statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseBackend, DatabaseConnection, DbErr, EntityTrait, FromQueryResult,
    QueryFilter, QueryOrder, Set, Statement,
};

use crate::db::entities::{prelude::*, status_log};
use crate::monitoring::types::{BucketUnit, ProbeOutcome, ProbeStatus, UptimeBucket};
use crate::monitoring::{RepositoryError, StatusLogRepository};

#[derive(FromQueryResult, Debug, Clone)]
struct UptimeRow {
    bucket_start: DateTime<Utc>,
    total_checks: i64,
    up_checks: i64,
    uptime_percent: f64,
}

/// Inserts one outcome. A row with the same `(url_id, checked_at)` is left as is.
pub async fn append_status_log(
    db: &DatabaseConnection,
    outcome: &ProbeOutcome,
) -> Result<u64, DbErr> {
    let entry = status_log::ActiveModel {
        url_id: Set(outcome.url_id),
        status: Set(outcome.status.code()),
        response_time: Set(outcome.latency_ms),
        error: Set(outcome.error.clone()),
        checked_at: Set(outcome.checked_at),
        ..Default::default()
    };

    StatusLog::insert(entry)
        .on_conflict(
            OnConflict::columns([status_log::Column::UrlId, status_log::Column::CheckedAt])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await
}

pub async fn get_latest_status_log(
    db: &DatabaseConnection,
    url_id: i32,
) -> Result<Option<status_log::Model>, DbErr> {
    StatusLog::find()
        .filter(status_log::Column::UrlId.eq(url_id))
        .order_by_desc(status_log::Column::CheckedAt)
        .one(db)
        .await
}

pub async fn list_status_logs(
    db: &DatabaseConnection,
    url_id: i32,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<status_log::Model>, DbErr> {
    StatusLog::find()
        .filter(status_log::Column::UrlId.eq(url_id))
        .filter(status_log::Column::CheckedAt.between(start, end))
        .order_by_asc(status_log::Column::CheckedAt)
        .all(db)
        .await
}

/// Buckets the history of `url_id` by `unit` (truncated in UTC) and reports the
/// share of 2xx results per bucket, rounded to two decimals.
pub async fn get_uptime_stats(
    db: &DatabaseConnection,
    url_id: i32,
    unit: BucketUnit,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<UptimeBucket>, DbErr> {
    let rows = UptimeRow::find_by_statement(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"
        SELECT
            date_trunc($1, checked_at AT TIME ZONE 'UTC') AT TIME ZONE 'UTC' AS bucket_start,
            COUNT(*) AS total_checks,
            COUNT(*) FILTER (WHERE status BETWEEN 200 AND 299) AS up_checks,
            ROUND(
                COUNT(*) FILTER (WHERE status BETWEEN 200 AND 299) * 100.0 / COUNT(*),
                2
            )::float8 AS uptime_percent
        FROM status_logs
        WHERE url_id = $2
          AND checked_at BETWEEN $3 AND $4
        GROUP BY 1
        ORDER BY 1 ASC
        "#,
        [
            unit.as_sql().into(),
            url_id.into(),
            start.into(),
            end.into(),
        ],
    ))
    .all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| UptimeBucket {
            bucket_start: row.bucket_start,
            total_checks: row.total_checks,
            up_checks: row.up_checks,
            uptime_percent: row.uptime_percent,
        })
        .collect())
}

impl From<status_log::Model> for ProbeOutcome {
    fn from(model: status_log::Model) -> Self {
        ProbeOutcome {
            url_id: model.url_id,
            status: ProbeStatus::from_code(model.status),
            latency_ms: model.response_time,
            checked_at: model.checked_at,
            error: model.error,
        }
    }
}

/// `StatusLogRepository` backed by Postgres.
#[derive(Clone)]
pub struct PgStatusLogRepository {
    db: DatabaseConnection,
}

impl PgStatusLogRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StatusLogRepository for PgStatusLogRepository {
    async fn append(&self, outcome: &ProbeOutcome) -> Result<(), RepositoryError> {
        append_status_log(&self.db, outcome).await?;
        Ok(())
    }

    async fn most_recent(&self, url_id: i32) -> Result<Option<ProbeOutcome>, RepositoryError> {
        Ok(get_latest_status_log(&self.db, url_id)
            .await?
            .map(ProbeOutcome::from))
    }

    async fn aggregate(
        &self,
        url_id: i32,
        unit: BucketUnit,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UptimeBucket>, RepositoryError> {
        Ok(get_uptime_stats(&self.db, url_id, unit, start, end).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_to_outcome_maps_sentinel() {
        let now = Utc::now();
        let model = status_log::Model {
            id: 1,
            url_id: 4,
            status: 0,
            response_time: 30_000,
            error: Some("request timed out".to_string()),
            checked_at: now,
        };

        let outcome = ProbeOutcome::from(model);
        assert_eq!(outcome.url_id, 4);
        assert_eq!(outcome.status, ProbeStatus::TransportFailure);
        assert_eq!(outcome.latency_ms, 30_000);
        assert_eq!(outcome.checked_at, now);
        assert_eq!(outcome.error.as_deref(), Some("request timed out"));
    }

    #[test]
    fn test_model_to_outcome_keeps_http_status() {
        let model = status_log::Model {
            id: 2,
            url_id: 4,
            status: 302,
            response_time: 80,
            error: None,
            checked_at: Utc::now(),
        };
        assert_eq!(ProbeOutcome::from(model).status, ProbeStatus::Http(302));
    }
}
