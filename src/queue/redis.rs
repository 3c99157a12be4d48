use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::{self, Script};
use deadpool_redis::{Config, Pool, Runtime};
use std::time::Duration;
use tracing::{error, info};

use super::{
    ClaimedTask, DEAD_LIST_LIMIT, MaintenanceReport, QueueBackend, QueueError, TaskEnvelope,
};

/// Entries handled per maintenance pass and key.
const MAINTENANCE_BATCH: i64 = 500;

const CLAIM_SCRIPT: &str = r#"
local raw = redis.call('LMOVE', KEYS[1], KEYS[2], 'RIGHT', 'LEFT')
if raw then
    redis.call('ZADD', KEYS[3], ARGV[1], raw)
end
return raw
"#;

const ACK_SCRIPT: &str = r#"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return 1
"#;

const RETRY_SCRIPT: &str = r#"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[2])
return 1
"#;

const FAIL_SCRIPT: &str = r#"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('LPUSH', KEYS[3], ARGV[2])
redis.call('LTRIM', KEYS[3], 0, tonumber(ARGV[3]) - 1)
return 1
"#;

const MAINTENANCE_SCRIPT: &str = r#"
local now = ARGV[1]
local limit = tonumber(ARGV[2])
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now, 'LIMIT', 0, limit)
for _, raw in ipairs(due) do
    redis.call('ZREM', KEYS[1], raw)
    redis.call('LPUSH', KEYS[2], raw)
end
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', now, 'LIMIT', 0, limit)
local reclaimed = 0
for _, raw in ipairs(expired) do
    redis.call('ZREM', KEYS[3], raw)
    if redis.call('LREM', KEYS[4], 1, raw) > 0 then
        redis.call('LPUSH', KEYS[2], raw)
        reclaimed = reclaimed + 1
    end
end
return {#due, reclaimed}
"#;

/// Key names under one namespace.
#[derive(Debug, Clone)]
struct QueueKeys {
    namespace: String,
    pending: String,
    active: String,
    leases: String,
    scheduled: String,
    dead: String,
}

impl QueueKeys {
    fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            pending: format!("{namespace}:pending"),
            active: format!("{namespace}:active"),
            leases: format!("{namespace}:leases"),
            scheduled: format!("{namespace}:scheduled"),
            dead: format!("{namespace}:dead"),
        }
    }

    fn unique(&self, key: &str) -> String {
        format!("{}:unique:{}", self.namespace, key)
    }
}

/// Queue stored in Redis. Pending work is a list consumed from the right;
/// every move between lists and sorted sets runs as one Lua script.
pub struct RedisQueue {
    pool: Pool,
    keys: QueueKeys,
    claim_script: Script,
    ack_script: Script,
    retry_script: Script,
    fail_script: Script,
    maintenance_script: Script,
}

impl RedisQueue {
    pub fn new(redis_url: &str, namespace: &str) -> Result<Self, QueueError> {
        let pool = Config::from_url(redis_url).create_pool(Some(Runtime::Tokio1))?;
        info!(namespace, "Redis queue initialised.");
        Ok(Self::with_pool(pool, namespace))
    }

    pub fn with_pool(pool: Pool, namespace: &str) -> Self {
        Self {
            pool,
            keys: QueueKeys::new(namespace),
            claim_script: Script::new(CLAIM_SCRIPT),
            ack_script: Script::new(ACK_SCRIPT),
            retry_script: Script::new(RETRY_SCRIPT),
            fail_script: Script::new(FAIL_SCRIPT),
            maintenance_script: Script::new(MAINTENANCE_SCRIPT),
        }
    }

    pub async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Replaces the active entry `active_raw` with `dead_raw` on the capped dead list.
    async fn move_to_dead(&self, active_raw: &str, dead_raw: &str) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = self
            .fail_script
            .key(&self.keys.active)
            .key(&self.keys.leases)
            .key(&self.keys.dead)
            .arg(active_raw)
            .arg(dead_raw)
            .arg(DEAD_LIST_LIMIT as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn push(
        &self,
        envelope: &TaskEnvelope,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError> {
        let raw = envelope.encode()?;
        let mut conn = self.pool.get().await?;
        match run_at {
            Some(run_at) if run_at > Utc::now() => {
                let _: i64 = redis::cmd("ZADD")
                    .arg(&self.keys.scheduled)
                    .arg(run_at.timestamp_millis())
                    .arg(&raw)
                    .query_async(&mut conn)
                    .await?;
            }
            _ => {
                let _: i64 = redis::cmd("LPUSH")
                    .arg(&self.keys.pending)
                    .arg(&raw)
                    .query_async(&mut conn)
                    .await?;
            }
        }
        Ok(())
    }

    async fn claim(&self, lease_until: DateTime<Utc>) -> Result<Option<ClaimedTask>, QueueError> {
        loop {
            let raw: Option<String> = {
                let mut conn = self.pool.get().await?;
                self.claim_script
                    .key(&self.keys.pending)
                    .key(&self.keys.active)
                    .key(&self.keys.leases)
                    .arg(lease_until.timestamp_millis())
                    .invoke_async(&mut conn)
                    .await?
            };
            let Some(raw) = raw else {
                return Ok(None);
            };

            match TaskEnvelope::decode(&raw) {
                Ok(envelope) => return Ok(Some(ClaimedTask::new(envelope, raw))),
                Err(e) => {
                    error!(error = %e, raw = %raw, "Undecodable task moved to the dead list.");
                    self.move_to_dead(&raw, &raw).await?;
                }
            }
        }
    }

    async fn ack(&self, claimed: &ClaimedTask) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = self
            .ack_script
            .key(&self.keys.active)
            .key(&self.keys.leases)
            .arg(claimed.raw())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn retry(
        &self,
        claimed: &ClaimedTask,
        next: &TaskEnvelope,
        run_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let next_raw = next.encode()?;
        let mut conn = self.pool.get().await?;
        let _: i64 = self
            .retry_script
            .key(&self.keys.active)
            .key(&self.keys.leases)
            .key(&self.keys.scheduled)
            .arg(claimed.raw())
            .arg(&next_raw)
            .arg(run_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, claimed: &ClaimedTask, dead: &TaskEnvelope) -> Result<(), QueueError> {
        let dead_raw = dead.encode()?;
        self.move_to_dead(claimed.raw(), &dead_raw).await
    }

    async fn acquire_unique(&self, key: &str, ttl: Duration) -> Result<bool, QueueError> {
        let mut conn = self.pool.get().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(self.keys.unique(key))
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn run_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, QueueError> {
        let mut conn = self.pool.get().await?;
        let (promoted, reclaimed): (u64, u64) = self
            .maintenance_script
            .key(&self.keys.scheduled)
            .key(&self.keys.pending)
            .key(&self.keys.leases)
            .key(&self.keys.active)
            .arg(now.timestamp_millis())
            .arg(MAINTENANCE_BATCH)
            .invoke_async(&mut conn)
            .await?;
        Ok(MaintenanceReport {
            promoted,
            reclaimed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        let keys = QueueKeys::new("uptimatic");
        assert_eq!(keys.pending, "uptimatic:pending");
        assert_eq!(keys.active, "uptimatic:active");
        assert_eq!(keys.leases, "uptimatic:leases");
        assert_eq!(keys.scheduled, "uptimatic:scheduled");
        assert_eq!(keys.dead, "uptimatic:dead");
        assert_eq!(keys.unique("cron:validate_uptime:60"), "uptimatic:unique:cron:validate_uptime:60");
    }

    #[test]
    fn test_new_rejects_malformed_url() {
        assert!(RedisQueue::new("definitely not a redis url", "ns").is_err());
    }
}
