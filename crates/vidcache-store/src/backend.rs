//! Storage backend abstraction.
//!
//! Two primitives are needed: TTL-bound status records with conditional
//! writes, and sorted sets scored by epoch milliseconds. Redis provides both
//! natively; [`crate::MemoryCacheStore`] mirrors the same semantics in-process.

use std::time::Duration;

use async_trait::async_trait;
use vidcache_models::JobStatusRecord;

use crate::error::StoreResult;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a status record.
    async fn get_status(&self, key: &str) -> StoreResult<Option<JobStatusRecord>>;

    /// Write `record` only if the key is absent or holds a claimable
    /// (terminal) record. Returns `false` when another job holds it.
    async fn claim_status(&self, key: &str, record: &JobStatusRecord, ttl: Duration)
        -> StoreResult<bool>;

    /// Replace the record only while it is `Running` for `job_id`.
    /// Returns `false` when the record is gone or owned by another job.
    async fn transition_status(
        &self,
        key: &str,
        job_id: &str,
        record: &JobStatusRecord,
        ttl: Duration,
    ) -> StoreResult<bool>;

    async fn delete_status(&self, key: &str) -> StoreResult<()>;

    /// Insert or overwrite a member's score.
    async fn zadd(&self, set: &str, member: &str, score: i64) -> StoreResult<()>;

    /// Insert a member, or raise its score; never lowers an existing score.
    async fn zadd_max(&self, set: &str, member: &str, score: i64) -> StoreResult<()>;

    async fn zscore(&self, set: &str, member: &str) -> StoreResult<Option<i64>>;

    /// Members with score `<= max`, ascending, at most `limit`.
    async fn zrange_by_score(&self, set: &str, max: i64, limit: usize)
        -> StoreResult<Vec<(String, i64)>>;

    /// Lowest-scored members, ascending, at most `limit`.
    async fn zrange_head(&self, set: &str, limit: usize) -> StoreResult<Vec<(String, i64)>>;

    /// Returns whether the member was present.
    async fn zrem(&self, set: &str, member: &str) -> StoreResult<bool>;
}
