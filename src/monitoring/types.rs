use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Check intervals (seconds) an endpoint may be configured with.
pub const ALLOWED_INTERVALS: [i32; 7] = [60, 120, 300, 600, 900, 1800, 3600];

/// Status code stored for probes that never produced an HTTP response.
pub const TRANSPORT_FAILURE_STATUS: i32 = 0;

pub fn is_allowed_interval(seconds: i32) -> bool {
    ALLOWED_INTERVALS.contains(&seconds)
}

/// A user-registered URL under monitoring, joined with its owner's contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredEndpoint {
    pub id: i32,
    pub public_id: Uuid,
    pub user_id: i32,
    pub owner_email: String,
    pub label: String,
    pub url: String,
    pub interval_seconds: i32,
    pub active: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MonitoredEndpoint {
    /// An endpoint is due when it was never probed, or when at least one full
    /// interval has elapsed since its last check.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checked {
            None => true,
            Some(last_checked) => {
                now.signed_duration_since(last_checked)
                    >= Duration::seconds(self.interval_seconds as i64)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    Up,
    Down,
}

impl StatusClass {
    pub fn from_status_code(code: i32) -> Self {
        if (200..=299).contains(&code) {
            StatusClass::Up
        } else {
            StatusClass::Down
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusClass::Up => write!(f, "up"),
            StatusClass::Down => write!(f, "down"),
        }
    }
}

/// What a probe observed: an HTTP status of any kind, or no response at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Http(u16),
    TransportFailure,
}

impl ProbeStatus {
    pub fn code(self) -> i32 {
        match self {
            ProbeStatus::Http(code) => code as i32,
            ProbeStatus::TransportFailure => TRANSPORT_FAILURE_STATUS,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match u16::try_from(code) {
            Ok(code) if code != 0 => ProbeStatus::Http(code),
            _ => ProbeStatus::TransportFailure,
        }
    }

    pub fn class(self) -> StatusClass {
        StatusClass::from_status_code(self.code())
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Http(code) => write!(f, "{code}"),
            ProbeStatus::TransportFailure => write!(f, "unreachable"),
        }
    }
}

/// One entry of the append-only status log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub url_id: i32,
    pub status: ProbeStatus,
    pub latency_ms: i64,
    pub checked_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketUnit {
    Hour,
    Day,
    Month,
}

impl BucketUnit {
    /// Unit name understood by Postgres `date_trunc`.
    pub fn as_sql(self) -> &'static str {
        match self {
            BucketUnit::Hour => "hour",
            BucketUnit::Day => "day",
            BucketUnit::Month => "month",
        }
    }

    pub fn truncate(self, time: DateTime<Utc>) -> DateTime<Utc> {
        let truncated = match self {
            BucketUnit::Hour => Utc.with_ymd_and_hms(
                time.year(),
                time.month(),
                time.day(),
                time.hour(),
                0,
                0,
            ),
            BucketUnit::Day => {
                Utc.with_ymd_and_hms(time.year(), time.month(), time.day(), 0, 0, 0)
            }
            BucketUnit::Month => Utc.with_ymd_and_hms(time.year(), time.month(), 1, 0, 0, 0),
        };
        // UTC has no gaps or folds, so the conversion is always unique.
        truncated.single().unwrap_or(time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeBucket {
    pub bucket_start: DateTime<Utc>,
    pub total_checks: i64,
    pub up_checks: i64,
    pub uptime_percent: f64,
}

/// Percentage of `up` over `total`, rounded to two decimals.
pub fn uptime_percent(up: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = up as f64 * 100.0 / total as f64;
    (raw * 100.0).round() / 100.0
}

/// Groups outcomes checked within `[start, end]` into buckets of `unit`,
/// ordered by bucket start.
pub fn aggregate_outcomes<'a>(
    outcomes: impl IntoIterator<Item = &'a ProbeOutcome>,
    unit: BucketUnit,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<UptimeBucket> {
    let mut buckets: BTreeMap<DateTime<Utc>, (i64, i64)> = BTreeMap::new();

    for outcome in outcomes {
        if outcome.checked_at < start || outcome.checked_at > end {
            continue;
        }
        let entry = buckets.entry(unit.truncate(outcome.checked_at)).or_default();
        entry.0 += 1;
        if outcome.status.class() == StatusClass::Up {
            entry.1 += 1;
        }
    }

    buckets
        .into_iter()
        .map(|(bucket_start, (total, up))| UptimeBucket {
            bucket_start,
            total_checks: total,
            up_checks: up,
            uptime_percent: uptime_percent(up, total),
        })
        .collect()
}
