//! SeaORM entities mapping the `users`, `urls` and `status_logs` tables.

pub mod monitored_url;
pub mod status_log;
pub mod user;

// Prelude module for easy importing of all entities and their related types
pub mod prelude {
    pub use super::user::ActiveModel as UserActiveModel;
    pub use super::user::Column as UserColumn;
    pub use super::user::Entity as User;
    pub use super::user::Model as UserModel;

    pub use super::monitored_url::ActiveModel as MonitoredUrlActiveModel;
    pub use super::monitored_url::Column as MonitoredUrlColumn;
    pub use super::monitored_url::Entity as MonitoredUrl;
    pub use super::monitored_url::Model as MonitoredUrlModel;

    pub use super::status_log::ActiveModel as StatusLogActiveModel;
    pub use super::status_log::Column as StatusLogColumn;
    pub use super::status_log::Entity as StatusLog;
    pub use super::status_log::Model as StatusLogModel;
}
