//! Queue task definitions and the components that execute them.

pub mod dispatcher;
pub mod handler;
pub mod scanner;
pub mod types;

pub use dispatcher::{CheckDispatcher, DispatchOutcome};
pub use handler::TaskHandler;
pub use scanner::{DueEndpointScanner, ScanReport};
pub use types::{CheckPayload, Task, TaskError};
