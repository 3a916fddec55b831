//! In-process backend.
//!
//! Same semantics as the Redis backend, including TTL expiry driven by the
//! injected clock. Used for single-node deployments and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use vidcache_models::{Clock, JobStatus, JobStatusRecord, SystemClock};

use crate::backend::CacheStore;
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
struct State {
    /// key -> (serialized record, expiry millis)
    statuses: HashMap<String, (String, i64)>,
    sets: HashMap<String, HashMap<String, i64>>,
}

impl State {
    /// Live record for `key`, dropping it if expired.
    fn live_status(&mut self, key: &str, now: i64) -> StoreResult<Option<JobStatusRecord>> {
        let expired = matches!(self.statuses.get(key), Some((_, expires_at)) if *expires_at <= now);
        if expired {
            self.statuses.remove(key);
        }
        self.statuses
            .get(key)
            .map(|(raw, _)| {
                JobStatusRecord::from_json(raw).map_err(|e| StoreError::corrupt(key, e.to_string()))
            })
            .transpose()
    }

    fn put_status(&mut self, key: &str, record: &JobStatusRecord, ttl: Duration, now: i64) -> StoreResult<()> {
        let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.statuses
            .insert(key.to_string(), (record.to_json()?, now.saturating_add(ttl)));
        Ok(())
    }

    fn sorted(&self, set: &str) -> Vec<(String, i64)> {
        let mut entries: Vec<(String, i64)> = self
            .sets
            .get(set)
            .map(|members| members.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

/// In-memory [`CacheStore`].
pub struct MemoryCacheStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryCacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get_status(&self, key: &str) -> StoreResult<Option<JobStatusRecord>> {
        let now = self.clock.now_millis();
        self.state().live_status(key, now)
    }

    async fn claim_status(
        &self,
        key: &str,
        record: &JobStatusRecord,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = self.clock.now_millis();
        let mut state = self.state();
        // An unreadable record is overwritten, matching the Redis script.
        let current = state.live_status(key, now).ok().flatten();
        if let Some(current) = current {
            if matches!(current.status, JobStatus::Running | JobStatus::Queued) {
                return Ok(false);
            }
        }
        state.put_status(key, record, ttl, now)?;
        Ok(true)
    }

    async fn transition_status(
        &self,
        key: &str,
        job_id: &str,
        record: &JobStatusRecord,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = self.clock.now_millis();
        let mut state = self.state();
        match state.live_status(key, now).ok().flatten() {
            Some(current) if current.is_running_for(job_id) => {
                state.put_status(key, record, ttl, now)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_status(&self, key: &str) -> StoreResult<()> {
        self.state().statuses.remove(key);
        Ok(())
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> StoreResult<()> {
        self.state()
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zadd_max(&self, set: &str, member: &str, score: i64) -> StoreResult<()> {
        let mut state = self.state();
        let current = state
            .sets
            .entry(set.to_string())
            .or_default()
            .entry(member.to_string())
            .or_insert(score);
        *current = (*current).max(score);
        Ok(())
    }

    async fn zscore(&self, set: &str, member: &str) -> StoreResult<Option<i64>> {
        Ok(self
            .state()
            .sets
            .get(set)
            .and_then(|members| members.get(member).copied()))
    }

    async fn zrange_by_score(
        &self,
        set: &str,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>> {
        Ok(self
            .state()
            .sorted(set)
            .into_iter()
            .take_while(|(_, score)| *score <= max)
            .take(limit)
            .collect())
    }

    async fn zrange_head(&self, set: &str, limit: usize) -> StoreResult<Vec<(String, i64)>> {
        Ok(self.state().sorted(set).into_iter().take(limit).collect())
    }

    async fn zrem(&self, set: &str, member: &str) -> StoreResult<bool> {
        let mut state = self.state();
        let removed = state
            .sets
            .get_mut(set)
            .map(|members| members.remove(member).is_some())
            .unwrap_or(false);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vidcache_models::ManualClock;

    fn store() -> (MemoryCacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (MemoryCacheStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let (store, _) = store();
        let ttl = Duration::from_secs(60);
        let first = JobStatusRecord::running(Utc::now(), None);
        let second = JobStatusRecord::running(Utc::now(), None);

        assert!(store.claim_status("k", &first, ttl).await.unwrap());
        assert!(!store.claim_status("k", &second, ttl).await.unwrap());
        assert_eq!(store.get_status("k").await.unwrap().unwrap().job_id, first.job_id);
    }

    #[tokio::test]
    async fn test_claim_after_terminal_state() {
        let (store, _) = store();
        let ttl = Duration::from_secs(60);
        let mut first = JobStatusRecord::running(Utc::now(), None);
        store.claim_status("k", &first, ttl).await.unwrap();

        first.fail();
        let job_id = first.job_id.clone();
        assert!(store.transition_status("k", &job_id, &first, ttl).await.unwrap());

        let second = JobStatusRecord::running(Utc::now(), None);
        assert!(store.claim_status("k", &second, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_transition_requires_owner() {
        let (store, _) = store();
        let ttl = Duration::from_secs(60);
        let record = JobStatusRecord::running(Utc::now(), None);
        store.claim_status("k", &record, ttl).await.unwrap();

        let mut stale = record.clone();
        stale.complete("x");
        assert!(!store.transition_status("k", "other-job", &stale, ttl).await.unwrap());
        assert!(!store.transition_status("missing", &record.job_id, &stale, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_status_expires_with_ttl() {
        let (store, clock) = store();
        let record = JobStatusRecord::running(Utc::now(), None);
        store
            .claim_status("k", &record, Duration::from_secs(10))
            .await
            .unwrap();

        clock.advance_secs(9);
        assert!(store.get_status("k").await.unwrap().is_some());
        clock.advance_secs(1);
        assert!(store.get_status("k").await.unwrap().is_none());

        // An expired running record no longer blocks admission.
        let next = JobStatusRecord::running(Utc::now(), None);
        assert!(store.claim_status("k", &next, Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_zadd_max_never_regresses() {
        let (store, _) = store();
        store.zadd_max("s", "a", 100).await.unwrap();
        store.zadd_max("s", "a", 50).await.unwrap();
        assert_eq!(store.zscore("s", "a").await.unwrap(), Some(100));
        store.zadd_max("s", "a", 150).await.unwrap();
        assert_eq!(store.zscore("s", "a").await.unwrap(), Some(150));

        // Plain zadd overwrites.
        store.zadd("s", "a", 10).await.unwrap();
        assert_eq!(store.zscore("s", "a").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_range_queries_are_ascending() {
        let (store, _) = store();
        store.zadd("s", "c", 30).await.unwrap();
        store.zadd("s", "a", 10).await.unwrap();
        store.zadd("s", "b", 20).await.unwrap();

        let head = store.zrange_head("s", 2).await.unwrap();
        assert_eq!(head, vec![("a".to_string(), 10), ("b".to_string(), 20)]);

        let upto = store.zrange_by_score("s", 20, 10).await.unwrap();
        assert_eq!(upto.len(), 2);
        assert!(store.zrem("s", "a").await.unwrap());
        assert!(!store.zrem("s", "a").await.unwrap());
        assert!(store.zrange_by_score("missing", 100, 10).await.unwrap().is_empty());
    }
}
