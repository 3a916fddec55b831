//! Worker wired to in-memory state, a scripted encoder and a local object
//! directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use vidcache_media::testing::{ScriptedOutcome, ScriptedRunner};
use vidcache_models::{JobKey, ManualClock, Resolution, SourceMedia};
use vidcache_storage::LocalObjectStore;
use vidcache_store::{MemoryCacheStore, StoreConfig};
use vidcache_worker::{CacheEnvironment, CacheWorker, ResolveRequest, WorkerConfig};

pub const START_MILLIS: i64 = 1_700_000_000_000;

pub struct TestWorker {
    pub worker: Arc<CacheWorker>,
    pub runner: Arc<ScriptedRunner>,
    pub clock: Arc<ManualClock>,
    pub cache: TempDir,
    pub objects: TempDir,
}

impl TestWorker {
    pub fn new() -> Self {
        let cache = tempfile::tempdir().unwrap();
        let objects = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let runner = Arc::new(ScriptedRunner::new());

        let config = WorkerConfig {
            cache_root: cache.path().to_path_buf(),
            cache_bytes: 50_000_000,
            max_concurrent_transcodes: 2,
            shutdown_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let env = CacheEnvironment::new(
            config,
            Arc::new(MemoryCacheStore::new(clock.clone())),
            &StoreConfig::default(),
            Arc::new(LocalObjectStore::new(objects.path())),
            runner.clone(),
            clock.clone(),
        );

        Self {
            worker: Arc::new(CacheWorker::new(Arc::new(env))),
            runner,
            clock,
            cache,
            objects,
        }
    }

    /// A 1080p source for `media_id`, stored under the `media` bucket.
    pub async fn video_request(&self, media_id: u64, resolution: Resolution) -> ResolveRequest {
        let object = format!("videos/{}.mp4", media_id);
        let path = self.objects.path().join("media").join(&object);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, vec![0u8; 1_000]).await.unwrap();

        ResolveRequest {
            key: JobKey::media(media_id, resolution),
            source: SourceMedia {
                bucket: "media".to_string(),
                object,
                width: 1920,
                height: 1080,
                size: 2_000_000,
            },
        }
    }

    pub fn artifact(&self, key: &JobKey) -> PathBuf {
        key.artifact_path(self.cache.path())
    }
}

/// Encoder that writes its output (the last argument) on exit.
pub fn writes_output(outcome: ScriptedOutcome) -> ScriptedOutcome {
    outcome.with_effect(|spec| {
        std::fs::write(spec.args.last().unwrap(), b"rendition").unwrap();
    })
}

pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
