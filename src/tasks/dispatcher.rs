use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::types::{CheckPayload, TaskError};
use crate::alerting::{Transition, TransitionNotifier};
use crate::monitoring::{EndpointRepository, ProbeOutcome, Prober, StatusLogRepository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Checked {
        outcome: ProbeOutcome,
        transition: Option<Transition>,
    },
    /// Another worker holds the check lease for this endpoint.
    LeaseHeld,
}

/// Runs one check: probe, record, detect a transition, advance `last_checked`.
pub struct CheckDispatcher {
    endpoints: Arc<dyn EndpointRepository>,
    logs: Arc<dyn StatusLogRepository>,
    prober: Arc<dyn Prober>,
    notifier: TransitionNotifier,
    check_lease: chrono::Duration,
}

impl CheckDispatcher {
    pub fn new(
        endpoints: Arc<dyn EndpointRepository>,
        logs: Arc<dyn StatusLogRepository>,
        prober: Arc<dyn Prober>,
        notifier: TransitionNotifier,
        check_lease: chrono::Duration,
    ) -> Self {
        Self {
            endpoints,
            logs,
            prober,
            notifier,
            check_lease,
        }
    }

    pub async fn dispatch(
        &self,
        check: &CheckPayload,
        shutdown: watch::Receiver<bool>,
    ) -> Result<DispatchOutcome, TaskError> {
        let now = Utc::now();
        if !self
            .endpoints
            .try_acquire_check_lease(check.url_id, now, now + self.check_lease)
            .await?
        {
            info!(url_id = check.url_id, url = %check.url, "Check already in progress elsewhere. Skipping.");
            return Ok(DispatchOutcome::LeaseHeld);
        }

        match self.run_check(check, shutdown).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if let Err(release_err) = self.endpoints.release_check_lease(check.url_id).await {
                    warn!(url_id = check.url_id, error = %release_err, "Failed to release check lease. It will expire on its own.");
                }
                Err(e)
            }
        }
    }

    async fn run_check(
        &self,
        check: &CheckPayload,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<DispatchOutcome, TaskError> {
        let previous = self.logs.most_recent(check.url_id).await?;

        let outcome = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => {
                warn!(url_id = check.url_id, url = %check.url, "Probe aborted by shutdown.");
                return Err(TaskError::Cancelled);
            }
            outcome = self.prober.probe(check.url_id, &check.url) => outcome,
        };

        self.logs.append(&outcome).await?;

        let transition = self
            .notifier
            .notify(check, previous.as_ref(), &outcome)
            .await
            .map(|(transition, _)| transition);

        self.endpoints
            .update_last_checked(check.url_id, outcome.checked_at)
            .await?;

        info!(
            url_id = check.url_id,
            url = %check.url,
            status = %outcome.status,
            latency_ms = outcome.latency_ms,
            "Check recorded."
        );

        Ok(DispatchOutcome::Checked {
            outcome,
            transition,
        })
    }
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone
/// without having requested it.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::memory::{MemoryEndpointRepository, MemoryStatusLogRepository};
    use crate::monitoring::{MonitoredEndpoint, ProbeStatus, StatusClass};
    use crate::notifications::TemplateId;
    use crate::queue::{MemoryQueue, TaskQueue};
    use crate::tasks::Task;
    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    /// Replays a fixed list of status codes, one per probe, each a second apart.
    struct ScriptedProber {
        statuses: Mutex<VecDeque<u16>>,
        clock: Mutex<DateTime<Utc>>,
    }

    impl ScriptedProber {
        fn new(statuses: &[u16]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                clock: Mutex::new(Utc::now()),
            }
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, url_id: i32, _url: &str) -> ProbeOutcome {
            let status = self.statuses.lock().await.pop_front().unwrap_or(200);
            let mut clock = self.clock.lock().await;
            *clock += chrono::Duration::seconds(1);
            ProbeOutcome {
                url_id,
                status: ProbeStatus::Http(status),
                latency_ms: 15,
                checked_at: *clock,
                error: None,
            }
        }
    }

    struct HangingProber;

    #[async_trait]
    impl Prober for HangingProber {
        async fn probe(&self, _url_id: i32, _url: &str) -> ProbeOutcome {
            std::future::pending().await
        }
    }

    struct Fixture {
        endpoints: Arc<MemoryEndpointRepository>,
        logs: Arc<MemoryStatusLogRepository>,
        queue: Arc<MemoryQueue>,
        check: CheckPayload,
    }

    async fn fixture() -> Fixture {
        let endpoints = Arc::new(MemoryEndpointRepository::new());
        let endpoint = MonitoredEndpoint {
            id: 1,
            public_id: Uuid::new_v4(),
            user_id: 1,
            owner_email: "owner@example.com".to_string(),
            label: "Status page".to_string(),
            url: "https://status.example.com".to_string(),
            interval_seconds: 60,
            active: true,
            last_checked: None,
            created_at: Utc::now(),
        };
        let check = CheckPayload::from(&endpoint);
        endpoints.insert(endpoint).await.unwrap();
        Fixture {
            endpoints,
            logs: Arc::new(MemoryStatusLogRepository::new()),
            queue: Arc::new(MemoryQueue::new()),
            check,
        }
    }

    fn dispatcher(fx: &Fixture, prober: Arc<dyn Prober>) -> CheckDispatcher {
        let notifier = TransitionNotifier::new(
            Arc::new(TaskQueue::new(fx.queue.clone())),
            FixedOffset::east_opt(7 * 3600).unwrap(),
            "https://localhost/icon.png".to_string(),
        );
        CheckDispatcher::new(
            fx.endpoints.clone(),
            fx.logs.clone(),
            prober,
            notifier,
            chrono::Duration::seconds(90),
        )
    }

    async fn alert_templates(queue: &MemoryQueue) -> Vec<TemplateId> {
        queue
            .pending_tasks()
            .await
            .unwrap()
            .into_iter()
            .filter_map(|envelope| match envelope.task {
                Task::SendNotification(payload) => Some(payload.template),
                _ => None,
            })
            .collect()
    }

    async fn seed_up_outcome(fx: &Fixture) {
        fx.logs
            .append(&ProbeOutcome {
                url_id: 1,
                status: ProbeStatus::Http(200),
                latency_ms: 12,
                checked_at: Utc::now() - chrono::Duration::minutes(1),
                error: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_sequence_emits_two_alerts() {
        let fx = fixture().await;
        seed_up_outcome(&fx).await;
        let dispatcher = dispatcher(&fx, Arc::new(ScriptedProber::new(&[200, 200, 500, 500, 200])));
        let (_tx, rx) = watch::channel(false);

        for _ in 0..5 {
            dispatcher.dispatch(&fx.check, rx.clone()).await.unwrap();
        }

        assert_eq!(
            alert_templates(&fx.queue).await,
            vec![TemplateId::Down, TemplateId::Up]
        );
        assert_eq!(fx.logs.all_for(1).await.len(), 6);
    }

    #[tokio::test]
    async fn test_first_failing_check_records_without_alert() {
        let fx = fixture().await;
        let dispatcher = dispatcher(&fx, Arc::new(ScriptedProber::new(&[503])));
        let (_tx, rx) = watch::channel(false);

        let result = dispatcher.dispatch(&fx.check, rx).await.unwrap();

        match result {
            DispatchOutcome::Checked { outcome, transition } => {
                assert_eq!(outcome.status.class(), StatusClass::Down);
                assert!(transition.is_none());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(alert_templates(&fx.queue).await.is_empty());
        assert_eq!(fx.logs.all_for(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_first_healthy_check_sends_up_alert() {
        let fx = fixture().await;
        let dispatcher = dispatcher(&fx, Arc::new(ScriptedProber::new(&[200])));
        let (_tx, rx) = watch::channel(false);

        let result = dispatcher.dispatch(&fx.check, rx).await.unwrap();

        match result {
            DispatchOutcome::Checked { transition, .. } => {
                assert_eq!(transition, Some(Transition::Recovered));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(alert_templates(&fx.queue).await, vec![TemplateId::Up]);
    }

    #[tokio::test]
    async fn test_last_checked_matches_latest_outcome() {
        let fx = fixture().await;
        let dispatcher = dispatcher(&fx, Arc::new(ScriptedProber::new(&[200, 404, 200])));
        let (_tx, rx) = watch::channel(false);

        let mut previous: Option<DateTime<Utc>> = None;
        for _ in 0..3 {
            dispatcher.dispatch(&fx.check, rx.clone()).await.unwrap();
            let last_checked = fx.endpoints.get(1).await.unwrap().last_checked.unwrap();
            let latest = fx.logs.most_recent(1).await.unwrap().unwrap();
            assert_eq!(last_checked, latest.checked_at);
            if let Some(previous) = previous {
                assert!(last_checked > previous);
            }
            previous = Some(last_checked);
        }
        assert!(fx.endpoints.lease_until(1).await.is_none());
    }

    #[tokio::test]
    async fn test_held_lease_skips_check() {
        let fx = fixture().await;
        let now = Utc::now();
        fx.endpoints
            .try_acquire_check_lease(1, now, now + chrono::Duration::seconds(90))
            .await
            .unwrap();
        let dispatcher = dispatcher(&fx, Arc::new(ScriptedProber::new(&[200])));
        let (_tx, rx) = watch::channel(false);

        let result = dispatcher.dispatch(&fx.check, rx).await.unwrap();

        assert_eq!(result, DispatchOutcome::LeaseHeld);
        assert!(fx.logs.all_for(1).await.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_releases_lease() {
        let fx = fixture().await;
        fx.logs.fail_appends(true);
        let dispatcher = dispatcher(&fx, Arc::new(ScriptedProber::new(&[200])));
        let (_tx, rx) = watch::channel(false);

        let result = dispatcher.dispatch(&fx.check, rx).await;

        assert!(matches!(result, Err(TaskError::Repository(_))));
        assert!(fx.endpoints.lease_until(1).await.is_none());
        assert!(fx.endpoints.get(1).await.unwrap().last_checked.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_in_flight_probe() {
        let fx = fixture().await;
        let dispatcher = dispatcher(&fx, Arc::new(HangingProber));
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
            tx
        });
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            dispatcher.dispatch(&fx.check, rx),
        )
        .await
        .unwrap();
        let _tx = stopper.await.unwrap();

        assert!(matches!(result, Err(TaskError::Cancelled)));
        assert!(fx.endpoints.lease_until(1).await.is_none());
        assert!(fx.logs.all_for(1).await.is_empty());
    }
}
