//! Idle reaper.
//!
//! One cycle stops transcodes nobody is watching, evicts artifacts nobody
//! has viewed within the staleness window and republishes free capacity.
//! Every per-entry failure is logged and counted; none aborts the cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vidcache_models::{JobKey, JobStatus};
use vidcache_store::{LastAccessTracker, DEFAULT_SCAN_LIMIT};

use crate::environment::CacheEnvironment;
use crate::error::{WorkerError, WorkerResult};
use crate::eviction::{ArtifactEvictor, Eviction};
use crate::metrics;
use crate::transcoder::Transcoder;

/// Counters for one reaper cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Running jobs stopped for lack of viewers
    pub jobs_stopped: usize,
    /// Registry entries dropped because their job had already ended
    pub registry_dropped: usize,
    pub videos_evicted: usize,
    pub thumbnails_evicted: usize,
    pub album_images_evicted: usize,
    pub step_failures: usize,
    /// Free bytes published at the end of the cycle
    pub usable_bytes: Option<u64>,
}

#[derive(Clone, Copy)]
enum ArtifactSet {
    Video,
    Thumbnail,
    Album,
}

impl ArtifactSet {
    fn label(self) -> &'static str {
        match self {
            ArtifactSet::Video => "video",
            ArtifactSet::Thumbnail => "thumbnail",
            ArtifactSet::Album => "album",
        }
    }
}

pub struct IdleReaper {
    env: Arc<CacheEnvironment>,
    transcoder: Arc<Transcoder>,
    evictor: ArtifactEvictor,
}

impl IdleReaper {
    pub fn new(env: Arc<CacheEnvironment>, transcoder: Arc<Transcoder>) -> Self {
        Self {
            evictor: ArtifactEvictor::new(Arc::clone(&env)),
            env,
            transcoder,
        }
    }

    /// Run one full cycle against the environment clock.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let cutoff = self.env.stale_cutoff();

        if let Err(e) = self.stop_orphans(cutoff, &mut report).await {
            self.step_failed(&mut report, "stop orphans", &e);
        }
        for set in [ArtifactSet::Video, ArtifactSet::Thumbnail, ArtifactSet::Album] {
            if let Err(e) = self.evict_stale(set, cutoff, &mut report).await {
                self.step_failed(&mut report, set.label(), &e);
            }
        }
        match self.env.ram_disk.refresh_usable_memory().await {
            Ok(bytes) => report.usable_bytes = Some(bytes),
            Err(e) => self.step_failed(&mut report, "capacity refresh", &e),
        }

        debug!(?report, "Reaper cycle finished");
        report
    }

    fn step_failed(&self, report: &mut CycleReport, step: &str, error: &WorkerError) {
        let error = WorkerError::reaper_step(format!("{}: {}", step, error));
        warn!("{}", error);
        metrics::record_reaper_step_failure();
        report.step_failures += 1;
    }

    /// Walk the registry oldest-first, stopping at the first job whose key
    /// was viewed after `cutoff`.
    async fn stop_orphans(&self, cutoff: i64, report: &mut CycleReport) -> WorkerResult<()> {
        let entries = self
            .env
            .statuses
            .registry()
            .oldest(DEFAULT_SCAN_LIMIT)
            .await?;

        for (member, _) in entries {
            if self.env.video_access.is_fresh(&member, cutoff).await? {
                break;
            }
            if let Err(e) = self.stop_orphan(&member, report).await {
                self.step_failed(report, &format!("stop {}", member), &e);
            }
        }
        Ok(())
    }

    async fn stop_orphan(&self, member: &str, report: &mut CycleReport) -> WorkerResult<()> {
        let registry = self.env.statuses.registry();
        let key: JobKey = match member.parse() {
            Ok(key) => key,
            Err(e) => {
                warn!(member = member, "Dropping unparseable registry member: {}", e);
                registry.remove_member(member).await?;
                report.registry_dropped += 1;
                return Ok(());
            }
        };

        match self.env.statuses.get(&key).await? {
            Some(record) if record.status == JobStatus::Running => {
                self.transcoder.stop(&record.job_id);
                if !self.env.statuses.stop(&key, &record.job_id).await? {
                    registry.remove(&key).await?;
                }
                metrics::record_reaper_stopped();
                report.jobs_stopped += 1;
                info!(job_key = %key, job_id = %record.job_id, "Stopped idle transcode");
            }
            record => {
                registry.remove(&key).await?;
                // A completed artifact keeps its entry so the eviction pass
                // deletes the file.
                if !matches!(record, Some(ref r) if r.status == JobStatus::Completed) {
                    self.env.video_access.remove(member).await?;
                }
                report.registry_dropped += 1;
                debug!(job_key = %key, "Dropped stale registry entry");
            }
        }
        Ok(())
    }

    fn tracker(&self, set: ArtifactSet) -> &LastAccessTracker {
        match set {
            ArtifactSet::Video => &self.env.video_access,
            ArtifactSet::Thumbnail => &self.env.thumbnail_access,
            ArtifactSet::Album => &self.env.album_access,
        }
    }

    /// Evict the stale prefix of one set. An entry is removed only after its
    /// artifact is gone, so a failed delete is retried next cycle. Entries of
    /// running jobs stay put, and a page that removes nothing ends the scan.
    async fn evict_stale(&self, set: ArtifactSet, cutoff: i64, report: &mut CycleReport) -> WorkerResult<()> {
        let tracker = self.tracker(set);
        loop {
            let stale = tracker.stale_prefix(cutoff, DEFAULT_SCAN_LIMIT).await?;
            let full_page = stale.len() == DEFAULT_SCAN_LIMIT;
            let mut failed = false;
            let mut removed = 0;

            for (member, _) in stale {
                let result = match set {
                    ArtifactSet::Video => self.evictor.evict_video(&member).await,
                    ArtifactSet::Thumbnail | ArtifactSet::Album => self.evictor.evict_image(&member).await,
                };
                match result {
                    Ok(Eviction::SkippedRunning) => {}
                    Ok(eviction) => {
                        tracker.remove(&member).await?;
                        removed += 1;
                        if eviction == Eviction::Evicted {
                            self.count_eviction(set, report);
                        }
                    }
                    Err(e) => {
                        failed = true;
                        self.step_failed(report, &format!("evict {}", member), &e);
                    }
                }
            }

            if !full_page || failed || removed == 0 {
                return Ok(());
            }
        }
    }

    fn count_eviction(&self, set: ArtifactSet, report: &mut CycleReport) {
        metrics::record_eviction(set.label());
        match set {
            ArtifactSet::Video => report.videos_evicted += 1,
            ArtifactSet::Thumbnail => report.thumbnails_evicted += 1,
            ArtifactSet::Album => report.album_images_evicted += 1,
        }
    }

    /// Run cycles every `period` until `shutdown` turns true. Ticks that
    /// fall behind are delayed, so cycles never overlap.
    pub fn spawn(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Idle reaper running every {}s", period.as_secs());
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let report = self.run_cycle().await;
                        if report.jobs_stopped + report.videos_evicted + report.thumbnails_evicted
                            + report.album_images_evicted > 0
                        {
                            info!(?report, "Reaper cycle");
                        }
                    }
                }
            }
            info!("Idle reaper stopped");
        })
    }
}
