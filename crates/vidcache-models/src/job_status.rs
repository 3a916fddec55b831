//! Job status records for the transcode cache.
//!
//! A record is created when a key is admitted and is kept in the shared store
//! under a TTL, so a worker that dies mid-transcode cannot strand its key in
//! `Running` forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted by an external scheduler, not yet started
    #[default]
    Queued,
    /// An encoder process owns the key
    Running,
    /// Artifact published at its canonical path
    Completed,
    /// Stopped by the reaper or an operator
    Stopped,
    /// Encoder exited non-zero or could not be spawned
    Failed,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Stopped => "stopped",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Stopped | JobStatus::Failed)
    }

    /// A key in this state can be claimed by a new job.
    pub fn is_claimable(&self) -> bool {
        self.is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status record stored per job key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusRecord {
    /// Current status
    pub status: JobStatus,
    /// Identifier of the job that owns (or owned) the key
    pub job_id: String,
    /// When the job was admitted
    pub scheduled_time: DateTime<Utc>,
    /// Canonical artifact path once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    /// Estimated output size reserved at admission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_size: Option<u64>,
}

impl JobStatusRecord {
    /// Create a fresh `Running` record with a new job id.
    pub fn running(scheduled_time: DateTime<Utc>, estimated_size: Option<u64>) -> Self {
        Self {
            status: JobStatus::Running,
            job_id: new_job_id(),
            scheduled_time,
            result_path: None,
            estimated_size,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `job_id` currently owns this key in `Running`.
    pub fn is_running_for(&self, job_id: &str) -> bool {
        self.status == JobStatus::Running && self.job_id == job_id
    }

    /// Mark job as completed with its artifact path.
    pub fn complete(&mut self, result_path: impl Into<String>) {
        self.status = JobStatus::Completed;
        self.result_path = Some(result_path.into());
    }

    pub fn fail(&mut self) {
        self.status = JobStatus::Failed;
    }

    pub fn stop(&mut self) {
        self.status = JobStatus::Stopped;
    }

    /// Serialize for the shared store.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize a record read from the shared store.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Generate a new random job ID.
pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}
