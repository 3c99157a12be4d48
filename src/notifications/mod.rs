pub mod models;
pub mod senders;
pub mod service;

pub use models::{NotificationPayload, TemplateId};
pub use service::{NotificationError, NotificationService};
