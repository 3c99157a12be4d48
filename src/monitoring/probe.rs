use async_trait::async_trait;
use chrono::Utc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{ProbeOutcome, ProbeStatus};

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

/// Anything that can observe an endpoint and report a single outcome.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url_id: i32, url: &str) -> ProbeOutcome;
}

/// Issues one HTTP GET per probe with a hard deadline.
///
/// Non-2xx responses and transport failures are both reported as outcomes;
/// a probe never returns an error to its caller.
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("uptimatic/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url_id: i32, url: &str) -> ProbeOutcome {
        let start_time = Instant::now();
        // The client timeout covers connect and headers; the outer deadline also
        // bounds anything the client does not account for.
        let result = tokio::time::timeout(self.timeout, self.client.get(url).send()).await;
        let latency_ms = start_time.elapsed().as_millis() as i64;

        let (status, error) = match result {
            Ok(Ok(response)) => (ProbeStatus::Http(response.status().as_u16()), None),
            Ok(Err(e)) => {
                let details = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                };
                (ProbeStatus::TransportFailure, Some(details))
            }
            Err(_) => (
                ProbeStatus::TransportFailure,
                Some("request timed out".to_string()),
            ),
        };

        match &error {
            Some(details) => warn!(url_id, url, latency_ms, error = %details, "Probe failed."),
            None => debug!(url_id, url, latency_ms, status = %status, "Probe completed."),
        }

        ProbeOutcome {
            url_id,
            status,
            latency_ms,
            checked_at: Utc::now(),
            error,
        }
    }
}
