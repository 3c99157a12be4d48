pub mod alerting;
pub mod config;
pub mod db;
pub mod logging;
pub mod monitoring;
pub mod notifications;
pub mod queue;
pub mod tasks;
