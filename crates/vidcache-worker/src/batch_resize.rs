//! Batch image resizer.
//!
//! Resizes many images per encoder invocation, at most `batch_size` at a
//! time. Each invocation succeeds or fails as a whole: on failure none of its
//! outputs is published, no tracker entry is written for them and the
//! remaining invocations are not started.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use vidcache_media::{
    publish_atomically, remove_if_exists, temp_path_for, BatchResizeCommand, ResizeTarget,
};
use vidcache_models::{Resolution, ResizeItem};
use vidcache_store::LastAccessTracker;

use crate::environment::CacheEnvironment;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Result of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Aggregate encoder exit code (0 when nothing needed resizing)
    pub exit_code: i32,
    /// Relative paths written by this batch
    pub resized: Vec<String>,
    /// Relative paths already cached and left alone
    pub skipped: Vec<String>,
}

struct Pending {
    member: String,
    input_url: String,
    output: PathBuf,
    tmp: PathBuf,
}

pub struct BatchResizer {
    env: Arc<CacheEnvironment>,
}

impl BatchResizer {
    pub fn new(env: Arc<CacheEnvironment>) -> Self {
        Self { env }
    }

    fn tracker(&self, is_thumbnail: bool) -> &LastAccessTracker {
        if is_thumbnail {
            &self.env.thumbnail_access
        } else {
            &self.env.album_access
        }
    }

    /// Resize `items` to `target` under `{cache_root}/{destination}`.
    ///
    /// Items whose output already has a live tracker entry and exists on disk
    /// are skipped. The rest are split into invocations of `batch_size`.
    pub async fn process_batch(
        &self,
        items: &[ResizeItem],
        target: Resolution,
        destination: &str,
        is_thumbnail: bool,
    ) -> WorkerResult<BatchOutcome> {
        if target.is_original() {
            return Err(WorkerError::invalid_request(
                "original resolution cannot be batch resized",
            ));
        }
        ensure_relative(destination)?;

        let tracker = self.tracker(is_thumbnail);
        let cutoff = self.env.stale_cutoff();
        let dest_dir = self.env.cache_root().join(destination);
        let mut outcome = BatchOutcome::default();
        let mut pending = Vec::new();

        for item in items {
            ensure_relative(&item.output_name)?;
            let member = format!("{}/{}", destination.trim_end_matches('/'), item.output_name);
            let output = dest_dir.join(&item.output_name);

            if tracker.is_fresh(&member, cutoff).await? && tokio::fs::try_exists(&output).await? {
                outcome.skipped.push(member);
                continue;
            }

            let input_url = self
                .env
                .objects
                .container_url(&item.bucket, &item.object)
                .await?;
            let tmp = temp_path_for(&output);
            pending.push(Pending {
                member,
                input_url,
                output,
                tmp,
            });
        }

        if pending.is_empty() {
            debug!(destination = destination, "Nothing to resize");
            return Ok(outcome);
        }

        let logger = JobLogger::for_batch(destination, "resize");
        for item in &pending {
            if let Some(parent) = item.output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        for chunk in pending.chunks(self.env.config.batch_size.max(1)) {
            outcome.exit_code = self.run_chunk(chunk, target, tracker, &logger).await?;
            outcome.resized.extend(chunk.iter().map(|item| item.member.clone()));
        }

        metrics::record_images_resized(outcome.resized.len());
        logger.log_completion(&format!("{} resized, {} skipped", outcome.resized.len(), outcome.skipped.len()));
        Ok(outcome)
    }

    /// One encoder invocation over `chunk`; publishes and dates every output
    /// on success.
    async fn run_chunk(
        &self,
        chunk: &[Pending],
        target: Resolution,
        tracker: &LastAccessTracker,
        logger: &JobLogger,
    ) -> WorkerResult<i32> {
        let targets = chunk
            .iter()
            .map(|item| ResizeTarget {
                input_url: item.input_url.clone(),
                output: item.tmp.clone(),
            })
            .collect();
        let command = BatchResizeCommand::new(targets, target);
        let spec = self.env.ffmpeg.spec(command.build_args());
        logger.log_start(&format!("{} images at {}", command.len(), target));

        let result = match self.env.runner.spawn(spec) {
            Ok(process) => process.completion.await,
            Err(e) => Err(e),
        };
        let output = match result {
            Ok(output) if output.success() => output,
            Ok(output) => {
                self.discard(chunk).await;
                logger.log_error(&output.stderr_lossy());
                return Err(WorkerError::batch_resize_failed(
                    output.exit_code,
                    output.stderr_lossy(),
                ));
            }
            Err(e) => {
                self.discard(chunk).await;
                return Err(e.into());
            }
        };

        let dated = self
            .env
            .now_millis()
            .saturating_add(self.env.config.image_retention_millis());
        for item in chunk {
            publish_atomically(&item.tmp, &item.output).await?;
            tracker.set(&item.member, dated).await?;
        }
        Ok(output.exit_code.unwrap_or(0))
    }

    async fn discard(&self, pending: &[Pending]) {
        for item in pending {
            remove_if_exists(&item.tmp).await;
        }
    }
}

fn ensure_relative(path: &str) -> WorkerResult<()> {
    let path = Path::new(path);
    let valid = path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(WorkerError::invalid_request(format!(
            "{} is not a relative cache path",
            path.display()
        )))
    }
}
