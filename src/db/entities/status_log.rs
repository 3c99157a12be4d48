use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "status_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub url_id: i32,
    /// HTTP status code, or 0 when no response was received.
    pub status: i32,
    pub response_time: i64,
    pub error: Option<String>,
    pub checked_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::monitored_url::Entity",
        from = "Column::UrlId",
        to = "super::monitored_url::Column::Id",
        on_delete = "Cascade"
    )]
    MonitoredUrl,
}

impl Related<super::monitored_url::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitoredUrl.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
