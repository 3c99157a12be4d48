use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;

use super::dispatcher::CheckDispatcher;
use super::scanner::DueEndpointScanner;
use super::types::{Task, TaskError};
use crate::notifications::NotificationService;
use crate::queue::TaskRunner;

/// Routes each task kind to the component that executes it.
pub struct TaskHandler {
    scanner: DueEndpointScanner,
    dispatcher: CheckDispatcher,
    notifications: Arc<NotificationService>,
}

impl TaskHandler {
    pub fn new(
        scanner: DueEndpointScanner,
        dispatcher: CheckDispatcher,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            scanner,
            dispatcher,
            notifications,
        }
    }
}

#[async_trait]
impl TaskRunner for TaskHandler {
    async fn run(&self, task: &Task, shutdown: watch::Receiver<bool>) -> Result<(), TaskError> {
        match task {
            Task::ValidateUptime => {
                self.scanner.scan(Utc::now()).await?;
            }
            Task::CheckUptime(check) => {
                self.dispatcher.dispatch(check, shutdown).await?;
            }
            Task::SendNotification(payload) => {
                self.notifications.deliver(payload).await?;
            }
        }
        Ok(())
    }
}
