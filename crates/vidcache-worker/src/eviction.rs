//! Artifact eviction shared by the reaper and capacity admission.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use vidcache_models::{JobKey, JobStatus};
use vidcache_store::DEFAULT_SCAN_LIMIT;

use crate::environment::CacheEnvironment;
use crate::error::WorkerResult;
use crate::ram_disk::EvictionSource;

/// What happened to one stale tracker member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// Artifact and status removed (the artifact may already have been gone)
    Evicted,
    /// Job still running; left for the reaper to stop
    SkippedRunning,
    /// Member did not parse as a job key; only the entry is dropped
    Unparseable,
}

#[derive(Clone)]
pub struct ArtifactEvictor {
    env: Arc<CacheEnvironment>,
}

impl ArtifactEvictor {
    pub fn new(env: Arc<CacheEnvironment>) -> Self {
        Self { env }
    }

    /// Delete a rendition and its status record. Does not touch the tracker.
    pub async fn evict_video(&self, member: &str) -> WorkerResult<Eviction> {
        let key: JobKey = match member.parse() {
            Ok(key) => key,
            Err(e) => {
                warn!(member = member, "Dropping unparseable tracker member: {}", e);
                return Ok(Eviction::Unparseable);
            }
        };

        if let Some(record) = self.env.statuses.get(&key).await? {
            if record.status == JobStatus::Running {
                debug!(job_key = %key, "Skipping eviction of running job");
                return Ok(Eviction::SkippedRunning);
            }
        }

        self.env
            .ram_disk
            .delete_force(key.artifact_relative_path())
            .await?;
        self.env.statuses.clear(&key).await?;
        debug!(job_key = %key, "Evicted rendition");
        Ok(Eviction::Evicted)
    }

    /// Delete a resized image by its path relative to the cache root.
    pub async fn evict_image(&self, member: &str) -> WorkerResult<Eviction> {
        self.env.ram_disk.delete_force(member).await?;
        Ok(Eviction::Evicted)
    }
}

/// Evicts the oldest stale rendition that is not still being encoded.
/// Running entries stay tracked; unparseable ones are dropped on the way.
#[async_trait]
impl EvictionSource for ArtifactEvictor {
    async fn evict_oldest_stale(&self) -> WorkerResult<bool> {
        let tracker = &self.env.video_access;
        let stale = tracker
            .stale_prefix(self.env.stale_cutoff(), DEFAULT_SCAN_LIMIT)
            .await?;

        for (member, _) in stale {
            match self.evict_video(&member).await? {
                Eviction::Evicted => {
                    tracker.remove(&member).await?;
                    crate::metrics::record_eviction("video");
                    return Ok(true);
                }
                Eviction::Unparseable => {
                    tracker.remove(&member).await?;
                }
                Eviction::SkippedRunning => {}
            }
        }
        Ok(false)
    }
}
