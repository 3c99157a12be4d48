pub mod entities;
pub mod services;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing::info;

const INIT_SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

pub async fn connect(database_url: &str, max_connections: u32) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url.to_owned());
    opt.max_connections(max_connections).sqlx_logging(false);
    Database::connect(opt).await
}

/// Applies the bundled schema. Every statement is idempotent.
pub async fn apply_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.execute_unprepared(INIT_SCHEMA).await?;
    info!("Database schema is up to date.");
    Ok(())
}
