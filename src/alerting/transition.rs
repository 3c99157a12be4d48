//! Up/down transition detection.
//!
//! Each new outcome is compared with the one recorded before it. A change of
//! status class produces exactly one notification task; repeated outcomes of
//! the same class produce none. An endpoint without history counts as down,
//! so its first 2xx outcome announces it as up.

use chrono::FixedOffset;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::monitoring::{ProbeOutcome, StatusClass};
use crate::notifications::{NotificationPayload, TemplateId};
use crate::queue::{TaskEnqueuer, TaskId};
use crate::tasks::{CheckPayload, Task};

const CHECKED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentDown,
    Recovered,
}

impl Transition {
    pub fn template(self) -> TemplateId {
        match self {
            Transition::WentDown => TemplateId::Down,
            Transition::Recovered => TemplateId::Up,
        }
    }
}

/// A missing `previous` is the transport-failure sentinel, which is down.
pub fn detect_transition(previous: Option<StatusClass>, current: StatusClass) -> Option<Transition> {
    match (previous.unwrap_or(StatusClass::Down), current) {
        (StatusClass::Up, StatusClass::Down) => Some(Transition::WentDown),
        (StatusClass::Down, StatusClass::Up) => Some(Transition::Recovered),
        _ => None,
    }
}

/// Turns transitions into queued `SendNotification` tasks.
pub struct TransitionNotifier {
    queue: Arc<dyn TaskEnqueuer>,
    offset: FixedOffset,
    logo_url: String,
}

impl TransitionNotifier {
    pub fn new(queue: Arc<dyn TaskEnqueuer>, offset: FixedOffset, logo_url: String) -> Self {
        Self {
            queue,
            offset,
            logo_url,
        }
    }

    pub fn build_payload(
        &self,
        check: &CheckPayload,
        outcome: &ProbeOutcome,
        transition: Transition,
    ) -> NotificationPayload {
        let template = transition.template();
        let checked_at = outcome
            .checked_at
            .with_timezone(&self.offset)
            .format(CHECKED_AT_FORMAT)
            .to_string();

        let mut data = BTreeMap::new();
        data.insert("logo_url".to_string(), self.logo_url.clone());
        data.insert("label".to_string(), check.label.clone());
        data.insert("url".to_string(), check.url.clone());
        data.insert("status".to_string(), outcome.status.to_string());
        data.insert("response_time".to_string(), outcome.latency_ms.to_string());
        data.insert("checked_at".to_string(), checked_at);

        NotificationPayload {
            to: check.owner_email.clone(),
            subject: template.subject().to_string(),
            template,
            data,
        }
    }

    /// Enqueues an alert when `outcome` flips the class of `previous`.
    ///
    /// Enqueue failures are logged and swallowed; the check itself already
    /// succeeded and must not be retried because of an alert.
    pub async fn notify(
        &self,
        check: &CheckPayload,
        previous: Option<&ProbeOutcome>,
        outcome: &ProbeOutcome,
    ) -> Option<(Transition, TaskId)> {
        let transition = detect_transition(
            previous.map(|p| p.status.class()),
            outcome.status.class(),
        )?;

        let payload = self.build_payload(check, outcome, transition);
        match self.queue.enqueue(Task::SendNotification(payload)).await {
            Ok(task_id) => {
                info!(
                    url_id = check.url_id,
                    url = %check.url,
                    template = %transition.template(),
                    task_id = %task_id,
                    "Status changed. Alert queued."
                );
                Some((transition, task_id))
            }
            Err(e) => {
                error!(
                    url_id = check.url_id,
                    url = %check.url,
                    template = %transition.template(),
                    error = %e,
                    "Status changed but the alert could not be queued."
                );
                None
            }
        }
    }
}
