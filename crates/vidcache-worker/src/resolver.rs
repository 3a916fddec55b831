//! Resolve requests: cache hit, dedup onto a running job, or admission of a
//! new transcode.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vidcache_models::{estimate_output_size, needs_transcode, JobKey, JobStatus, SourceMedia, TranscodeJob};
use vidcache_store::StoreError;

use crate::environment::CacheEnvironment;
use crate::error::{WorkerError, WorkerResult};
use crate::eviction::ArtifactEvictor;
use crate::metrics;
use crate::transcoder::Transcoder;

/// A client asking for `key`, with the catalog's facts about the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub key: JobKey,
    pub source: SourceMedia,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The rendition is cached at this path
    Ready(PathBuf),
    /// A transcode is in flight; ask again later
    RetryLater,
    /// The source already satisfies the request
    ServeOriginal,
}

impl ResolveOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            ResolveOutcome::Ready(_) => "ready",
            ResolveOutcome::RetryLater => "retry_later",
            ResolveOutcome::ServeOriginal => "serve_original",
        }
    }
}

pub struct MediaResolver {
    env: Arc<CacheEnvironment>,
    transcoder: Arc<Transcoder>,
    evictor: ArtifactEvictor,
}

impl MediaResolver {
    pub fn new(env: Arc<CacheEnvironment>, transcoder: Arc<Transcoder>) -> Self {
        Self {
            evictor: ArtifactEvictor::new(Arc::clone(&env)),
            env,
            transcoder,
        }
    }

    pub async fn resolve(&self, request: &ResolveRequest) -> WorkerResult<ResolveOutcome> {
        let result = self.resolve_inner(request).await;
        match &result {
            Ok(outcome) => metrics::record_resolve(outcome.metric_label()),
            Err(e) if e.is_capacity_exceeded() => metrics::record_resolve("capacity_exceeded"),
            Err(_) => {}
        }
        result
    }

    async fn resolve_inner(&self, request: &ResolveRequest) -> WorkerResult<ResolveOutcome> {
        let key = request.key;
        let source = &request.source;
        let target = key.resolution();

        if !needs_transcode(source.width, source.height, target) {
            return Ok(ResolveOutcome::ServeOriginal);
        }

        // Only a finished encode is ever renamed to the canonical path, so a
        // file there outlives its expired status record.
        let status = self.env.statuses.get(&key).await?.map(|record| record.status);
        match status {
            Some(JobStatus::Running | JobStatus::Queued) => return Ok(ResolveOutcome::RetryLater),
            Some(JobStatus::Failed | JobStatus::Stopped) => {}
            Some(JobStatus::Completed) | None => {
                let path = key.artifact_path(self.env.cache_root());
                if tokio::fs::try_exists(&path).await? {
                    self.refresh_last_access(&key).await?;
                    return Ok(ResolveOutcome::Ready(path));
                }
                if status.is_some() {
                    debug!(job_key = %key, "Completed record without artifact, re-admitting");
                }
            }
        }

        let estimated = estimate_output_size(source.size, source.width, source.height, target);
        let ram_disk = &self.env.ram_disk;
        if !ram_disk.free_for(estimated, &self.evictor).await? || !ram_disk.try_reserve(estimated) {
            return Err(WorkerError::capacity_exceeded(estimated, ram_disk.usable_bytes()));
        }

        let record = match self.env.statuses.claim(&key, Some(estimated)).await {
            Ok(record) => record,
            Err(StoreError::AdmissionConflict(_)) => {
                ram_disk.release(estimated);
                return Ok(ResolveOutcome::RetryLater);
            }
            Err(e) => {
                ram_disk.release(estimated);
                return Err(e.into());
            }
        };

        self.refresh_last_access(&key).await?;
        info!(job_key = %key, job_id = %record.job_id, estimated = estimated, "Admitted transcode");
        self.transcoder.start(
            TranscodeJob {
                key,
                job_id: record.job_id,
                source: source.clone(),
            },
            estimated,
        );
        Ok(ResolveOutcome::RetryLater)
    }

    /// Record that `key` is being viewed. Never moves the entry backwards.
    pub async fn refresh_last_access(&self, key: &JobKey) -> WorkerResult<()> {
        self.env
            .video_access
            .refresh(&key.to_string(), self.env.now_millis())
            .await?;
        Ok(())
    }

    /// Stop any running job for `key`, delete its artifact and drop all of
    /// its tracking state.
    pub async fn invalidate(&self, key: &JobKey) -> WorkerResult<()> {
        if let Some(record) = self.env.statuses.get(key).await? {
            if record.status == JobStatus::Running {
                self.transcoder.stop(&record.job_id);
                self.env.statuses.stop(key, &record.job_id).await?;
            }
        }

        self.env
            .ram_disk
            .delete_force(key.artifact_relative_path())
            .await?;
        self.env.statuses.clear(key).await?;
        self.env.statuses.registry().remove(key).await?;
        self.env.video_access.remove(&key.to_string()).await?;
        info!(job_key = %key, "Invalidated");
        Ok(())
    }
}
