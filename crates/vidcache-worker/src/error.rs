//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The cache cannot hold the rendition even after evicting stale artifacts.
    #[error("Capacity exceeded: need {needed} bytes, {available} available")]
    CapacityExceeded { needed: u64, available: u64 },

    #[error("Batch resize failed with exit code {exit_code:?}: {stderr}")]
    BatchResizeFailed { exit_code: Option<i32>, stderr: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Mount failed: {0}")]
    MountFailed(String),

    #[error("Reaper step failed: {0}")]
    ReaperStep(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vidcache_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vidcache_media::MediaError),

    #[error("Store error: {0}")]
    Store(#[from] vidcache_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn capacity_exceeded(needed: u64, available: u64) -> Self {
        Self::CapacityExceeded { needed, available }
    }

    pub fn batch_resize_failed(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::BatchResizeFailed {
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn mount_failed(msg: impl Into<String>) -> Self {
        Self::MountFailed(msg.into())
    }

    pub fn reaper_step(msg: impl Into<String>) -> Self {
        Self::ReaperStep(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, WorkerError::CapacityExceeded { .. })
    }
}

impl From<tokio::task::JoinError> for WorkerError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("task failed: {}", e))
    }
}
