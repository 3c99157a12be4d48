//! Database access for monitored URLs and their status history.
//!
//! Each sub-module owns one table and exposes free functions taking a
//! `&DatabaseConnection`, plus a repository type that plugs those functions
//! into the monitoring traits.

pub mod status_log_service;
pub mod url_service;

pub use status_log_service::PgStatusLogRepository;
pub use url_service::{
    EndpointSort, ListEndpointsQuery, NewEndpoint, PgEndpointRepository,
};
