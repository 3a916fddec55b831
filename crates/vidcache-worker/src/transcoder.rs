//! Transcode worker.
//!
//! Jobs run on a semaphore-bounded pool. Each job renders into a temp sibling
//! of its canonical artifact path and is renamed into place only after the
//! encoder exits 0, so a reader of the canonical path never sees a partial
//! file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use vidcache_media::{
    publish_atomically, remove_if_exists, temp_path_for, transcode_command, MediaError,
    PatternTerminator, Terminate,
};
use vidcache_models::{JobKey, TranscodeJob};

use crate::environment::CacheEnvironment;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Final state of one transcode as seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Completed(PathBuf),
    Failed,
    Stopped,
}

enum JobState {
    /// Waiting for a pool slot
    Queued { cancelled: bool },
    Running {
        terminator: Arc<dyn Terminate>,
        stopping: bool,
    },
}

struct JobEntry {
    key: JobKey,
    state: JobState,
}

type JobTable = Arc<Mutex<HashMap<String, JobEntry>>>;

fn lock(jobs: &JobTable) -> MutexGuard<'_, HashMap<String, JobEntry>> {
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Transcoder {
    env: Arc<CacheEnvironment>,
    pool: Arc<Semaphore>,
    jobs: JobTable,
}

impl Transcoder {
    pub fn new(env: Arc<CacheEnvironment>) -> Self {
        let permits = env.config.max_concurrent_transcodes.max(1);
        info!("Transcode pool sized to {} concurrent jobs", permits);
        Self {
            env,
            pool: Arc::new(Semaphore::new(permits)),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue `job` on the pool. The job must already be admitted (its key
    /// `running` under `job.job_id`). `reserved` bytes are settled with the
    /// capacity manager when the job ends, whatever its outcome.
    pub fn start(&self, job: TranscodeJob, reserved: u64) -> JoinHandle<TranscodeOutcome> {
        lock(&self.jobs).insert(
            job.job_id.clone(),
            JobEntry {
                key: job.key,
                state: JobState::Queued { cancelled: false },
            },
        );
        metrics::record_transcode_started(job.key.resolution().as_str());

        let logger = JobLogger::new(&job.key, &job.job_id, "transcode");
        let span = logger.create_span();
        let run = JobRun {
            env: Arc::clone(&self.env),
            pool: Arc::clone(&self.pool),
            jobs: Arc::clone(&self.jobs),
            logger,
            job,
            reserved,
        };
        tokio::spawn(run.execute().instrument(span))
    }

    /// Ask a job to stop (SIGINT to its process group). A queued job will
    /// never spawn. Unknown or finished jobs are a no-op; returns whether the
    /// job was known.
    pub fn stop(&self, job_id: &str) -> bool {
        self.signal(job_id, false)
    }

    /// Forced variant of [`Transcoder::stop`] (SIGKILL).
    pub fn kill(&self, job_id: &str) -> bool {
        self.signal(job_id, true)
    }

    fn signal(&self, job_id: &str, force: bool) -> bool {
        let mut jobs = lock(&self.jobs);
        let Some(entry) = jobs.get_mut(job_id) else {
            debug!(job_id = job_id, "Stop for unknown job ignored");
            return false;
        };

        match &mut entry.state {
            JobState::Queued { cancelled } => {
                *cancelled = true;
                info!(job_key = %entry.key, job_id = job_id, "Cancelled queued job");
            }
            JobState::Running {
                terminator,
                stopping,
            } => {
                *stopping = true;
                let result = if force {
                    terminator.kill()
                } else {
                    terminator.interrupt()
                };
                if let Err(e) = result {
                    warn!(job_key = %entry.key, job_id = job_id, "Failed to signal encoder: {}", e);
                } else {
                    info!(job_key = %entry.key, job_id = job_id, force = force, "Signalled encoder");
                }
            }
        }
        true
    }

    /// Jobs queued or running in this process.
    pub fn active_jobs(&self) -> usize {
        lock(&self.jobs).len()
    }

    /// Wait for in-flight jobs to finish. On timeout the remaining encoders
    /// are killed; returns whether everything finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let waited = tokio::time::timeout(timeout, async {
            while self.active_jobs() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        if waited.is_ok() {
            info!("All transcodes drained");
            return true;
        }

        let remaining: Vec<String> = lock(&self.jobs).keys().cloned().collect();
        warn!("Drain timed out with {} jobs left, killing them", remaining.len());
        for job_id in remaining {
            self.kill(&job_id);
        }
        false
    }
}

/// One job's execution, owned by its task.
struct JobRun {
    env: Arc<CacheEnvironment>,
    pool: Arc<Semaphore>,
    jobs: JobTable,
    logger: JobLogger,
    job: TranscodeJob,
    reserved: u64,
}

enum Attempt {
    Produced(PathBuf),
    Cancelled,
    Failed { stopped: bool },
}

impl JobRun {
    async fn execute(self) -> TranscodeOutcome {
        let started = Instant::now();
        let attempt = match self.attempt().await {
            Ok(attempt) => attempt,
            Err(e) => {
                self.logger.log_error(&e.to_string());
                Attempt::Failed {
                    stopped: self.was_stopped(),
                }
            }
        };
        lock(&self.jobs).remove(&self.job.job_id);

        let outcome = match self.finish(attempt, started).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.logger
                    .log_error(&format!("Failed to record job outcome: {}", e));
                TranscodeOutcome::Failed
            }
        };
        self.env.ram_disk.release(self.reserved);
        if matches!(outcome, TranscodeOutcome::Completed(_)) {
            if let Err(e) = self.env.ram_disk.refresh_usable_memory().await {
                warn!("Failed to re-measure cache after publish: {}", e);
            }
        }
        outcome
    }

    fn was_stopped(&self) -> bool {
        match lock(&self.jobs).get(&self.job.job_id).map(|e| &e.state) {
            Some(JobState::Queued { cancelled }) => *cancelled,
            Some(JobState::Running { stopping, .. }) => *stopping,
            None => false,
        }
    }

    async fn attempt(&self) -> WorkerResult<Attempt> {
        let _permit = Arc::clone(&self.pool)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::internal("transcode pool closed"))?;

        if self.was_stopped() {
            return Ok(Attempt::Cancelled);
        }

        let source = &self.job.source;
        let input_url = self
            .env
            .objects
            .container_url(&source.bucket, &source.object)
            .await?;

        let output = self.job.key.artifact_path(self.env.cache_root());
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = temp_path_for(&output);

        let command = transcode_command(
            &input_url,
            &tmp,
            source.width,
            source.height,
            self.job.key.resolution(),
            &self.job.job_id,
        );
        let spec = self.env.ffmpeg.spec(command.build_args());
        debug!("Running: {}", spec.display());

        // Spawn under the table lock so a concurrent stop either sees the
        // job as queued (and it never spawns) or gets the terminator.
        let completion = {
            let mut jobs = lock(&self.jobs);
            let Some(entry) = jobs.get_mut(&self.job.job_id) else {
                return Ok(Attempt::Cancelled);
            };
            if matches!(entry.state, JobState::Queued { cancelled: true }) {
                return Ok(Attempt::Cancelled);
            }
            let process = self.env.runner.spawn(spec)?;
            entry.state = JobState::Running {
                terminator: self.terminator_for(process.terminator),
                stopping: false,
            };
            process.completion
        };
        self.logger.log_start(&format!("{} -> {}", input_url, output.display()));

        let output_result = completion.await;
        let stopped = self.was_stopped();
        let process_output = match output_result {
            Ok(process_output) => process_output,
            Err(e) => {
                remove_if_exists(&tmp).await;
                return Err(e.into());
            }
        };

        if !process_output.success() {
            remove_if_exists(&tmp).await;
            if !stopped {
                let err = MediaError::transcode_failed(
                    process_output.exit_code,
                    process_output.stderr_lossy(),
                );
                self.logger.log_error(&err.to_string());
            }
            return Ok(Attempt::Failed { stopped });
        }

        publish_atomically(&tmp, &output).await?;
        Ok(Attempt::Produced(output))
    }

    /// Behind a prefix like `docker exec` the encoder is not in the local
    /// process group; it is found by the `job_id` tag in its arguments.
    fn terminator_for(&self, local: Arc<dyn Terminate>) -> Arc<dyn Terminate> {
        let ffmpeg = &self.env.ffmpeg;
        if !ffmpeg.is_prefixed() {
            return local;
        }
        Arc::new(PatternTerminator::new(
            Arc::clone(&self.env.runner),
            ffmpeg,
            format!("job_id={}", self.job.job_id),
            local,
        ))
    }

    async fn finish(&self, attempt: Attempt, started: Instant) -> WorkerResult<TranscodeOutcome> {
        let key = &self.job.key;
        let job_id = &self.job.job_id;
        let resolution = key.resolution().as_str();

        match attempt {
            Attempt::Produced(path) => {
                let applied = self
                    .env
                    .statuses
                    .complete(key, job_id, &path_str(&path))
                    .await?;
                if !applied {
                    self.logger
                        .log_warning("Job no longer owns its key; artifact kept at its canonical path");
                }
                self.env
                    .video_access
                    .refresh(&key.to_string(), self.env.now_millis())
                    .await?;
                metrics::record_transcode_completed(resolution, started.elapsed().as_secs_f64());
                self.logger.log_completion(&path.display().to_string());
                Ok(TranscodeOutcome::Completed(path))
            }
            Attempt::Cancelled | Attempt::Failed { stopped: true } => {
                self.env.statuses.stop(key, job_id).await?;
                metrics::record_transcode_failed(resolution, "stopped");
                self.logger.log_progress("Stopped");
                Ok(TranscodeOutcome::Stopped)
            }
            Attempt::Failed { stopped: false } => {
                self.env.statuses.fail(key, job_id).await?;
                metrics::record_transcode_failed(resolution, "failed");
                Ok(TranscodeOutcome::Failed)
            }
        }
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
