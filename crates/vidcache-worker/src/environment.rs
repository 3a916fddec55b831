//! The cache environment: everything the components share, built once in
//! `main` and handed around as an `Arc`.

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use vidcache_media::{MediaProbe, ProcessRunner, ToolInvocation};
use vidcache_models::Clock;
use vidcache_storage::ObjectStore;
use vidcache_store::{CacheStore, JobStatusStore, LastAccessTracker, StoreConfig};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::ram_disk::RamDisk;

pub struct CacheEnvironment {
    pub config: WorkerConfig,
    pub clock: Arc<dyn Clock>,
    pub statuses: JobStatusStore,
    /// Rendition keys, by last view
    pub video_access: LastAccessTracker,
    /// Resized album images, by relative path
    pub album_access: LastAccessTracker,
    /// Resized thumbnails, by relative path
    pub thumbnail_access: LastAccessTracker,
    pub objects: Arc<dyn ObjectStore>,
    pub runner: Arc<dyn ProcessRunner>,
    pub ffmpeg: ToolInvocation,
    pub ffprobe: ToolInvocation,
    pub ram_disk: RamDisk,
}

impl CacheEnvironment {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn CacheStore>,
        store_config: &StoreConfig,
        objects: Arc<dyn ObjectStore>,
        runner: Arc<dyn ProcessRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let keys = store_config.key_space();
        let statuses = JobStatusStore::new(
            Arc::clone(&store),
            keys.clone(),
            Arc::clone(&clock),
            store_config.status_ttl,
        );
        let ram_disk = RamDisk::new(
            config.cache_root.clone(),
            config.cache_bytes,
            config.mount_tmpfs,
            Arc::clone(&runner),
        );

        Self {
            ffmpeg: ToolInvocation::parse(&config.ffmpeg_command, "ffmpeg"),
            ffprobe: ToolInvocation::parse(&config.ffprobe_command, "ffprobe"),
            video_access: LastAccessTracker::new(Arc::clone(&store), keys.video_last_access()),
            album_access: LastAccessTracker::new(Arc::clone(&store), keys.album_last_access()),
            thumbnail_access: LastAccessTracker::new(store, keys.thumbnail_cache()),
            statuses,
            objects,
            runner,
            clock,
            ram_disk,
            config,
        }
    }

    /// Prepare the cache root. Idempotent.
    pub async fn initialize(&self) -> WorkerResult<()> {
        self.ram_disk.initialize().await?;
        info!(root = %self.cache_root().display(), "Cache environment ready");
        Ok(())
    }

    /// Release the cache root (unmount if this process mounted it).
    pub async fn shutdown(&self) -> WorkerResult<()> {
        self.ram_disk.shutdown().await
    }

    pub fn cache_root(&self) -> &Path {
        &self.config.cache_root
    }

    /// Probe wired to this environment's runner, tool and timeout.
    pub fn media_probe(&self) -> MediaProbe {
        MediaProbe::new(
            Arc::clone(&self.runner),
            self.ffprobe.clone(),
            self.config.probe_timeout,
        )
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Entries scored at or before this are stale.
    pub fn stale_cutoff(&self) -> i64 {
        self.now_millis().saturating_sub(self.config.staleness_millis())
    }
}
