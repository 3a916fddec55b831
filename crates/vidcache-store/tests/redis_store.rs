//! Integration tests against a live Redis.
//!
//! Run with `REDIS_URL=redis://localhost:6379 cargo test -p vidcache-store -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use vidcache_models::{JobKey, JobStatus, Resolution, SystemClock};
use vidcache_store::{
    CacheStore, JobStatusStore, KeySpace, RedisCacheStore, StoreConfig, TimeOrderedSet,
};

async fn connect(prefix: &str) -> (Arc<RedisCacheStore>, KeySpace) {
    let config = StoreConfig {
        key_prefix: format!("vidcache-test-{}-{}", prefix, std::process::id()),
        ..StoreConfig::from_env()
    };
    let store = RedisCacheStore::connect(&config).await.unwrap();
    (Arc::new(store), config.key_space())
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_admission_and_transition() {
    let (backend, keys) = connect("admission").await;
    let store = JobStatusStore::new(
        backend.clone(),
        keys.clone(),
        Arc::new(SystemClock),
        Duration::from_secs(30),
    );
    let key = JobKey::media(42, Resolution::P480);
    store.clear(&key).await.unwrap();

    let record = store.claim(&key, Some(1024)).await.unwrap();
    assert!(store.claim(&key, None).await.unwrap_err().is_admission_conflict());

    assert!(!store.complete(&key, "someone-else", "/x").await.unwrap());
    assert!(store.complete(&key, &record.job_id, "/x").await.unwrap());
    assert_eq!(store.get(&key).await.unwrap().unwrap().status, JobStatus::Completed);

    let next = store.claim(&key, None).await.unwrap();
    assert_ne!(next.job_id, record.job_id);
    assert!(store.stop(&key, &next.job_id).await.unwrap());

    store.clear(&key).await.unwrap();
    backend.zrem(&keys.running_jobs(), &key.to_string()).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_time_ordered_set() {
    let (backend, keys) = connect("sets").await;
    let set = TimeOrderedSet::new(backend, keys.video_last_access());

    set.refresh("a", 1_000).await.unwrap();
    set.refresh("a", 500).await.unwrap();
    set.set("b", 2_000).await.unwrap();
    set.set("c", 9_000).await.unwrap();
    assert_eq!(set.get("a").await.unwrap(), Some(1_000));

    let stale = set.pop_stale_prefix(5_000, 50).await.unwrap();
    let members: Vec<_> = stale.into_iter().map(|(m, _)| m).collect();
    assert_eq!(members, vec!["a", "b"]);

    assert!(set.remove("c").await.unwrap());
}
