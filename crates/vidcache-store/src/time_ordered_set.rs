//! Time-ordered sets: last-access trackers and the running-job registry.
//!
//! Members are scored by epoch milliseconds. Staleness queries are score-range
//! queries, so the ascending "scan until the first fresh entry" walk is a
//! property of the set rather than something each caller re-implements.

use std::sync::Arc;

use vidcache_models::JobKey;

use crate::backend::CacheStore;
use crate::error::StoreResult;

/// Upper bound on members returned by one stale-prefix query.
pub const DEFAULT_SCAN_LIMIT: usize = 50;

/// A named sorted set of `(member, epoch_millis)`.
#[derive(Clone)]
pub struct TimeOrderedSet {
    store: Arc<dyn CacheStore>,
    name: String,
}

impl TimeOrderedSet {
    pub fn new(store: Arc<dyn CacheStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the member's timestamp unconditionally.
    pub async fn set(&self, member: &str, at_millis: i64) -> StoreResult<()> {
        self.store.zadd(&self.name, member, at_millis).await
    }

    /// Advance the member's timestamp; an older `at_millis` is ignored.
    pub async fn refresh(&self, member: &str, at_millis: i64) -> StoreResult<()> {
        self.store.zadd_max(&self.name, member, at_millis).await
    }

    pub async fn get(&self, member: &str) -> StoreResult<Option<i64>> {
        self.store.zscore(&self.name, member).await
    }

    /// Whether the member has an entry newer than `cutoff_millis`.
    pub async fn is_fresh(&self, member: &str, cutoff_millis: i64) -> StoreResult<bool> {
        Ok(self
            .get(member)
            .await?
            .is_some_and(|at| at > cutoff_millis))
    }

    pub async fn remove(&self, member: &str) -> StoreResult<bool> {
        self.store.zrem(&self.name, member).await
    }

    /// Oldest entries first.
    pub async fn oldest(&self, limit: usize) -> StoreResult<Vec<(String, i64)>> {
        self.store.zrange_head(&self.name, limit).await
    }

    /// The ascending prefix of entries with timestamp `<= cutoff_millis`,
    /// without removing them. The walk ends at the first fresher entry.
    pub async fn stale_prefix(&self, cutoff_millis: i64, limit: usize) -> StoreResult<Vec<(String, i64)>> {
        self.store
            .zrange_by_score(&self.name, cutoff_millis, limit)
            .await
    }

    /// Remove and return the stale prefix.
    pub async fn pop_stale_prefix(
        &self,
        cutoff_millis: i64,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>> {
        let stale = self.stale_prefix(cutoff_millis, limit).await?;
        for (member, _) in &stale {
            self.store.zrem(&self.name, member).await?;
        }
        Ok(stale)
    }
}

/// Last-access tracker for one family of artifacts.
pub type LastAccessTracker = TimeOrderedSet;

/// Keys with an in-flight transcode, scored by start time.
#[derive(Clone)]
pub struct RunningJobRegistry {
    set: TimeOrderedSet,
}

impl RunningJobRegistry {
    pub fn new(store: Arc<dyn CacheStore>, name: impl Into<String>) -> Self {
        Self {
            set: TimeOrderedSet::new(store, name),
        }
    }

    pub async fn insert(&self, key: &JobKey, started_at_millis: i64) -> StoreResult<()> {
        self.set.set(&key.to_string(), started_at_millis).await
    }

    pub async fn remove(&self, key: &JobKey) -> StoreResult<bool> {
        self.set.remove(&key.to_string()).await
    }

    /// Remove a raw member, including ones that no longer parse as keys.
    pub async fn remove_member(&self, member: &str) -> StoreResult<bool> {
        self.set.remove(member).await
    }

    pub async fn started_at(&self, key: &JobKey) -> StoreResult<Option<i64>> {
        self.set.get(&key.to_string()).await
    }

    /// Earliest-started entries first.
    pub async fn oldest(&self, limit: usize) -> StoreResult<Vec<(String, i64)>> {
        self.set.oldest(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCacheStore;
    use vidcache_models::Resolution;

    fn set() -> TimeOrderedSet {
        TimeOrderedSet::new(Arc::new(MemoryCacheStore::default()), "last_access")
    }

    #[tokio::test]
    async fn test_refresh_is_monotonic() {
        let tracker = set();
        tracker.refresh("k", 1_000).await.unwrap();
        tracker.refresh("k", 500).await.unwrap();
        assert_eq!(tracker.get("k").await.unwrap(), Some(1_000));
        tracker.refresh("k", 2_000).await.unwrap();
        assert_eq!(tracker.get("k").await.unwrap(), Some(2_000));
    }

    #[tokio::test]
    async fn test_stale_prefix_stops_at_first_fresh_entry() {
        let tracker = set();
        let now = 100_000;
        let staleness = 60_000;
        // Scores ascending: three stale, then fresh ones.
        for (member, at) in [
            ("s1", now - 300_000),
            ("s2", now - 120_000),
            ("s3", now - 60_000),
            ("f1", now - 59_999),
            ("f2", now - 1_000),
        ] {
            tracker.set(member, at).await.unwrap();
        }

        let popped = tracker.pop_stale_prefix(now - staleness, 50).await.unwrap();
        let members: Vec<_> = popped.into_iter().map(|(m, _)| m).collect();
        assert_eq!(members, vec!["s1", "s2", "s3"]);

        let remaining: Vec<_> = tracker
            .oldest(10)
            .await
            .unwrap()
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(remaining, vec!["f1", "f2"]);
    }

    #[tokio::test]
    async fn test_stale_prefix_respects_limit() {
        let tracker = set();
        for i in 0..5 {
            tracker.set(&format!("m{}", i), i).await.unwrap();
        }
        let first = tracker.pop_stale_prefix(100, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let rest = tracker.stale_prefix(100, 50).await.unwrap();
        assert_eq!(rest.len(), 3);
    }

    #[tokio::test]
    async fn test_is_fresh() {
        let tracker = set();
        tracker.set("k", 1_000).await.unwrap();
        assert!(tracker.is_fresh("k", 999).await.unwrap());
        assert!(!tracker.is_fresh("k", 1_000).await.unwrap());
        assert!(!tracker.is_fresh("missing", 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_registry_orders_by_start_time() {
        let registry = RunningJobRegistry::new(Arc::new(MemoryCacheStore::default()), "running");
        let late = JobKey::media(2, Resolution::P480);
        let early = JobKey::media(1, Resolution::P480);
        registry.insert(&late, 200).await.unwrap();
        registry.insert(&early, 100).await.unwrap();

        let oldest = registry.oldest(10).await.unwrap();
        assert_eq!(oldest[0].0, early.to_string());
        assert_eq!(registry.started_at(&late).await.unwrap(), Some(200));

        assert!(registry.remove(&early).await.unwrap());
        assert!(!registry.remove(&early).await.unwrap());
    }
}
