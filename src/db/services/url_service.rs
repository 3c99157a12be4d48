//! Service for managing monitored URLs.
//!
//! Provides the management operations used by the endpoint API (create, lookup,
//! paged listing, pause/resume, delete) and the `EndpointRepository`
//! implementation the scanner and dispatcher run against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseBackend,
    DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    Statement,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::db::entities::{monitored_url, prelude::*, user};
use crate::monitoring::types::{MonitoredEndpoint, is_allowed_interval};
use crate::monitoring::{EndpointRepository, RepositoryError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEndpoint {
    pub user_id: i32,
    pub label: String,
    pub url: String,
    pub interval_seconds: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSort {
    #[default]
    Label,
    CreatedAt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEndpointsQuery {
    pub page: u64,
    pub per_page: u64,
    pub active: Option<bool>,
    pub search_label: Option<String>,
    #[serde(default)]
    pub sort: EndpointSort,
}

impl Default for ListEndpointsQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 10,
            active: None,
            search_label: None,
            sort: EndpointSort::Label,
        }
    }
}

pub async fn create_endpoint(
    db: &DatabaseConnection,
    data: NewEndpoint,
) -> Result<monitored_url::Model, RepositoryError> {
    if !is_allowed_interval(data.interval_seconds) {
        return Err(RepositoryError::InvalidInterval(data.interval_seconds));
    }

    let new_url = monitored_url::ActiveModel {
        public_id: Set(Uuid::new_v4()),
        user_id: Set(data.user_id),
        label: Set(data.label),
        url: Set(data.url),
        interval_seconds: Set(data.interval_seconds),
        active: Set(true),
        last_checked: Set(None),
        check_lease_until: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    Ok(new_url.insert(db).await?)
}

pub async fn find_by_public_id(
    db: &DatabaseConnection,
    public_id: Uuid,
) -> Result<Option<monitored_url::Model>, DbErr> {
    MonitoredUrl::find()
        .filter(monitored_url::Column::PublicId.eq(public_id))
        .one(db)
        .await
}

/// Returns one page of a user's URLs and the total number of matches.
pub async fn list_by_user(
    db: &DatabaseConnection,
    user_id: i32,
    query: &ListEndpointsQuery,
) -> Result<(Vec<monitored_url::Model>, u64), DbErr> {
    let mut select = MonitoredUrl::find().filter(monitored_url::Column::UserId.eq(user_id));

    if let Some(active) = query.active {
        select = select.filter(monitored_url::Column::Active.eq(active));
    }

    if let Some(search) = query.search_label.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.to_lowercase());
        select = select.filter(
            Expr::expr(Func::lower(Expr::col(monitored_url::Column::Label))).like(pattern),
        );
    }

    select = match query.sort {
        EndpointSort::CreatedAt => select.order_by_desc(monitored_url::Column::CreatedAt),
        EndpointSort::Label => select.order_by_asc(monitored_url::Column::Label),
    };

    let paginator = select.paginate(db, query.per_page.max(1));
    let total = paginator.num_items().await?;
    let urls = paginator.fetch_page(query.page.max(1) - 1).await?;

    Ok((urls, total))
}

pub async fn set_active(
    db: &DatabaseConnection,
    public_id: Uuid,
    user_id: i32,
    active: bool,
) -> Result<monitored_url::Model, RepositoryError> {
    let url = MonitoredUrl::find()
        .filter(monitored_url::Column::PublicId.eq(public_id))
        .filter(monitored_url::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("url {public_id}")))?;

    let mut active_url: monitored_url::ActiveModel = url.into();
    active_url.active = Set(active);
    Ok(active_url.update(db).await?)
}

pub async fn delete_endpoint(
    db: &DatabaseConnection,
    public_id: Uuid,
    user_id: i32,
) -> Result<(), RepositoryError> {
    let result = MonitoredUrl::delete_many()
        .filter(monitored_url::Column::PublicId.eq(public_id))
        .filter(monitored_url::Column::UserId.eq(user_id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(RepositoryError::NotFound(format!("url {public_id}")));
    }
    Ok(())
}

/// Fetches every active URL together with its owner.
pub async fn get_active_endpoints(
    db: &DatabaseConnection,
) -> Result<Vec<MonitoredEndpoint>, DbErr> {
    let rows = MonitoredUrl::find()
        .filter(monitored_url::Column::Active.eq(true))
        .find_also_related(User)
        .order_by_asc(monitored_url::Column::Id)
        .all(db)
        .await?;

    let endpoints = rows
        .into_iter()
        .filter_map(|(url, owner)| match owner {
            Some(owner) => Some(to_endpoint(url, &owner)),
            None => {
                // The foreign key makes this unreachable short of manual edits.
                warn!(url_id = url.id, "Active URL has no owner. Skipping.");
                None
            }
        })
        .collect();

    Ok(endpoints)
}

pub async fn try_acquire_check_lease(
    db: &DatabaseConnection,
    id: i32,
    now: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<bool, DbErr> {
    let result = MonitoredUrl::update_many()
        .col_expr(monitored_url::Column::CheckLeaseUntil, Expr::value(until))
        .filter(monitored_url::Column::Id.eq(id))
        .filter(
            Condition::any()
                .add(monitored_url::Column::CheckLeaseUntil.is_null())
                .add(monitored_url::Column::CheckLeaseUntil.lte(now)),
        )
        .exec(db)
        .await?;

    Ok(result.rows_affected == 1)
}

pub async fn release_check_lease(db: &DatabaseConnection, id: i32) -> Result<(), DbErr> {
    MonitoredUrl::update_many()
        .col_expr(
            monitored_url::Column::CheckLeaseUntil,
            Expr::value(Option::<DateTime<Utc>>::None),
        )
        .filter(monitored_url::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

/// Stores the completion time of a check and releases its lease.
/// `GREATEST` keeps `last_checked` from moving backwards when checks race.
pub async fn update_last_checked(
    db: &DatabaseConnection,
    id: i32,
    checked_at: DateTime<Utc>,
) -> Result<u64, DbErr> {
    let result = db
        .execute(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            UPDATE urls
            SET last_checked = GREATEST(last_checked, $1),
                check_lease_until = NULL
            WHERE id = $2
            "#,
            [checked_at.into(), id.into()],
        ))
        .await?;
    Ok(result.rows_affected())
}

fn to_endpoint(url: monitored_url::Model, owner: &user::Model) -> MonitoredEndpoint {
    MonitoredEndpoint {
        id: url.id,
        public_id: url.public_id,
        user_id: url.user_id,
        owner_email: owner.email.clone(),
        label: url.label,
        url: url.url,
        interval_seconds: url.interval_seconds,
        active: url.active,
        last_checked: url.last_checked,
        created_at: url.created_at,
    }
}

/// `EndpointRepository` backed by Postgres.
#[derive(Clone)]
pub struct PgEndpointRepository {
    db: DatabaseConnection,
}

impl PgEndpointRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EndpointRepository for PgEndpointRepository {
    async fn list_active(&self) -> Result<Vec<MonitoredEndpoint>, RepositoryError> {
        Ok(get_active_endpoints(&self.db).await?)
    }

    async fn try_acquire_check_lease(
        &self,
        id: i32,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(try_acquire_check_lease(&self.db, id, now, until).await?)
    }

    async fn release_check_lease(&self, id: i32) -> Result<(), RepositoryError> {
        Ok(release_check_lease(&self.db, id).await?)
    }

    async fn update_last_checked(
        &self,
        id: i32,
        checked_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        match update_last_checked(&self.db, id, checked_at).await? {
            0 => Err(RepositoryError::NotFound(format!("url {id}"))),
            _ => Ok(()),
        }
    }
}
