pub mod memory;
pub mod probe;
pub mod repository;
pub mod types;

pub use probe::{HttpProber, ProbeError, Prober};
pub use repository::{EndpointRepository, RepositoryError, StatusLogRepository};
pub use types::{
    BucketUnit, MonitoredEndpoint, ProbeOutcome, ProbeStatus, StatusClass, UptimeBucket,
};
