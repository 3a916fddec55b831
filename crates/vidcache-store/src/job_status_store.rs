//! Job status store and admission.
//!
//! Per key the lifecycle is `absent -> running -> completed | failed | stopped`.
//! Admission is a conditional write, so of any number of racing callers
//! exactly one wins. Terminal transitions are conditional on the caller's job
//! id still owning the key, so a worker that lost its record to TTL expiry and
//! re-admission cannot overwrite the newer job.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use vidcache_models::{Clock, JobKey, JobStatusRecord};

use crate::backend::CacheStore;
use crate::error::{StoreError, StoreResult};
use crate::keys::KeySpace;
use crate::time_ordered_set::RunningJobRegistry;

#[derive(Clone)]
pub struct JobStatusStore {
    store: Arc<dyn CacheStore>,
    keys: KeySpace,
    registry: RunningJobRegistry,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl JobStatusStore {
    pub fn new(store: Arc<dyn CacheStore>, keys: KeySpace, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        let registry = RunningJobRegistry::new(Arc::clone(&store), keys.running_jobs());
        Self {
            store,
            keys,
            registry,
            clock,
            ttl,
        }
    }

    pub fn registry(&self) -> &RunningJobRegistry {
        &self.registry
    }

    pub async fn get(&self, key: &JobKey) -> StoreResult<Option<JobStatusRecord>> {
        self.store.get_status(&self.keys.job_status(key)).await
    }

    /// Admit a new job for `key`.
    ///
    /// On success the key is `running` under a fresh job id and is in the
    /// running-job registry. Fails with [`StoreError::AdmissionConflict`]
    /// when another job already holds the key.
    pub async fn claim(&self, key: &JobKey, estimated_size: Option<u64>) -> StoreResult<JobStatusRecord> {
        let now = self.clock.now();
        let record = JobStatusRecord::running(now, estimated_size);

        if !self
            .store
            .claim_status(&self.keys.job_status(key), &record, self.ttl)
            .await?
        {
            debug!(job_key = %key, "Admission conflict");
            return Err(StoreError::admission_conflict(key.to_string()));
        }

        self.registry.insert(key, self.clock.now_millis()).await?;
        info!(job_key = %key, job_id = %record.job_id, "Job admitted");
        Ok(record)
    }

    /// `running -> completed`. Returns `false` if `job_id` no longer owns the key.
    pub async fn complete(&self, key: &JobKey, job_id: &str, result_path: &str) -> StoreResult<bool> {
        self.finish(key, job_id, |record| record.complete(result_path))
            .await
    }

    /// `running -> failed`.
    pub async fn fail(&self, key: &JobKey, job_id: &str) -> StoreResult<bool> {
        self.finish(key, job_id, JobStatusRecord::fail).await
    }

    /// `running -> stopped`.
    pub async fn stop(&self, key: &JobKey, job_id: &str) -> StoreResult<bool> {
        self.finish(key, job_id, JobStatusRecord::stop).await
    }

    async fn finish(
        &self,
        key: &JobKey,
        job_id: &str,
        apply: impl FnOnce(&mut JobStatusRecord),
    ) -> StoreResult<bool> {
        let status_key = self.keys.job_status(key);
        let Some(mut record) = self.store.get_status(&status_key).await? else {
            return Ok(false);
        };
        if !record.is_running_for(job_id) {
            return Ok(false);
        }

        apply(&mut record);
        let applied = self
            .store
            .transition_status(&status_key, job_id, &record, self.ttl)
            .await?;

        if applied {
            self.registry.remove(key).await?;
            debug!(job_key = %key, job_id = job_id, status = %record.status, "Job finished");
        }
        Ok(applied)
    }

    /// Drop the record entirely (explicit invalidation or eviction).
    pub async fn clear(&self, key: &JobKey) -> StoreResult<()> {
        self.store.delete_status(&self.keys.job_status(key)).await
    }
}
