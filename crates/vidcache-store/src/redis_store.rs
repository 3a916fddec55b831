//! Redis backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use vidcache_models::JobStatusRecord;

use crate::backend::CacheStore;
use crate::error::{StoreError, StoreResult};
use crate::keys::StoreConfig;

/// SET the record unless a non-terminal record already holds the key.
const CLAIM_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if raw then
    local ok, current = pcall(cjson.decode, raw)
    if ok and (current['status'] == 'running' or current['status'] == 'queued') then
        return 0
    end
end
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
return 1
"#;

/// SET the record only while it is running for the given job id.
const TRANSITION_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
    return 0
end
local ok, current = pcall(cjson.decode, raw)
if not ok or current['status'] ~= 'running' or current['job_id'] ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return 1
"#;

/// Redis-backed [`CacheStore`].
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: MultiplexedConnection,
    claim_script: Script,
    transition_script: Script,
}

impl RedisCacheStore {
    /// Connect to Redis.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::connection_failed(format!("Redis connection failed: {}", e)))?;

        info!("Connected to Redis for job status store");
        Ok(Self {
            conn,
            claim_script: Script::new(CLAIM_SCRIPT),
            transition_script: Script::new(TRANSITION_SCRIPT),
        })
    }

    /// Connect using environment variables.
    pub async fn from_env() -> StoreResult<Self> {
        Self::connect(&StoreConfig::from_env()).await
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn decode(key: &str, raw: &str) -> StoreResult<JobStatusRecord> {
    JobStatusRecord::from_json(raw).map_err(|e| StoreError::corrupt(key, e.to_string()))
}

fn to_millis(entries: Vec<(String, f64)>) -> Vec<(String, i64)> {
    entries
        .into_iter()
        .map(|(member, score)| (member, score as i64))
        .collect()
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get_status(&self, key: &str) -> StoreResult<Option<JobStatusRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|raw| decode(key, &raw)).transpose()
    }

    async fn claim_status(
        &self,
        key: &str,
        record: &JobStatusRecord,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let claimed: i32 = self
            .claim_script
            .key(key)
            .arg(record.to_json()?)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;

        debug!(key = key, claimed = claimed == 1, "Claim attempted");
        Ok(claimed == 1)
    }

    async fn transition_status(
        &self,
        key: &str,
        job_id: &str,
        record: &JobStatusRecord,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let applied: i32 = self
            .transition_script
            .key(key)
            .arg(job_id)
            .arg(record.to_json()?)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn delete_status(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zadd(set, member, score).await?;
        Ok(())
    }

    async fn zadd_max(&self, set: &str, member: &str, score: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        // ZADD GT still inserts absent members.
        let _: i64 = redis::cmd("ZADD")
            .arg(set)
            .arg("GT")
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn zscore(&self, set: &str, member: &str) -> StoreResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = conn.zscore(set, member).await?;
        Ok(score.map(|s| s as i64))
    }

    async fn zrange_by_score(
        &self,
        set: &str,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, f64)> = conn
            .zrangebyscore_limit_withscores(set, "-inf", max, 0, limit as isize)
            .await?;
        Ok(to_millis(entries))
    }

    async fn zrange_head(&self, set: &str, limit: usize) -> StoreResult<Vec<(String, i64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let entries: Vec<(String, f64)> = conn
            .zrange_withscores(set, 0, limit as isize - 1)
            .await?;
        Ok(to_millis(entries))
    }

    async fn zrem(&self, set: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.zrem(set, member).await?;
        Ok(removed > 0)
    }
}
