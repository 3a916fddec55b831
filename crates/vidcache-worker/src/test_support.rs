//! Shared fixtures for this crate's unit tests.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use vidcache_media::testing::{ScriptedOutcome, ScriptedRunner};
use vidcache_media::ProcessSpec;
use vidcache_models::{ManualClock, SourceMedia};
use vidcache_storage::LocalObjectStore;
use vidcache_store::{MemoryCacheStore, StoreConfig};

use crate::config::WorkerConfig;
use crate::environment::CacheEnvironment;

pub const START_MILLIS: i64 = 1_700_000_000_000;
pub const BUCKET: &str = "media";

pub struct Harness {
    pub env: Arc<CacheEnvironment>,
    pub runner: Arc<ScriptedRunner>,
    pub clock: Arc<ManualClock>,
    pub cache: TempDir,
    pub objects: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_budget(budget: u64) -> Self {
        Self::with_config(|config| config.cache_bytes = budget)
    }

    /// Defaults plus `adjust`; the cache root always points at a temp dir.
    pub fn with_config(adjust: impl FnOnce(&mut WorkerConfig)) -> Self {
        let cache = tempfile::tempdir().unwrap();
        let objects = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let runner = Arc::new(ScriptedRunner::new());

        let mut config = WorkerConfig {
            cache_bytes: 10_000_000,
            max_concurrent_transcodes: 2,
            ..Default::default()
        };
        adjust(&mut config);
        config.cache_root = cache.path().to_path_buf();
        let env = CacheEnvironment::new(
            config,
            Arc::new(MemoryCacheStore::new(clock.clone())),
            &StoreConfig::default(),
            Arc::new(LocalObjectStore::new(objects.path())),
            runner.clone(),
            clock.clone(),
        );

        Self {
            env: Arc::new(env),
            runner,
            clock,
            cache,
            objects,
        }
    }

    pub async fn put_object(&self, object: &str, bytes: usize) -> PathBuf {
        let path = self.objects.path().join(BUCKET).join(object);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, vec![0u8; bytes]).await.unwrap();
        path
    }

    pub fn source(&self, object: &str, width: u32, height: u32, size: u64) -> SourceMedia {
        SourceMedia {
            bucket: BUCKET.to_string(),
            object: object.to_string(),
            width,
            height,
            size,
        }
    }
}

/// The encoder's output path: the last argument.
pub fn output_arg(spec: &ProcessSpec) -> PathBuf {
    PathBuf::from(spec.args.last().unwrap())
}

/// Each single-frame output of a batch resize.
pub fn batch_outputs(spec: &ProcessSpec) -> Vec<PathBuf> {
    spec.args
        .windows(3)
        .filter(|w| w[0] == "-frames:v" && w[1] == "1")
        .map(|w| PathBuf::from(&w[2]))
        .collect()
}

/// An encoder run that writes its output and exits 0.
pub fn encoder_success() -> ScriptedOutcome {
    ScriptedOutcome::exit(0).with_effect(|spec| {
        std::fs::write(output_arg(spec), b"rendition").unwrap();
    })
}

/// A batch resize that writes every output and exits 0.
pub fn batch_success() -> ScriptedOutcome {
    ScriptedOutcome::exit(0).with_effect(|spec| {
        for output in batch_outputs(spec) {
            std::fs::write(output, b"image").unwrap();
        }
    })
}

/// Poll until `check` holds, up to about two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
