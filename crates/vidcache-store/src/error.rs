//! Store error types.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another job already owns the key. This is the normal dedup path.
    #[error("Admission conflict: {0} is already running")]
    AdmissionConflict(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Corrupt record at {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn admission_conflict(key: impl Into<String>) -> Self {
        Self::AdmissionConflict(key.into())
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn is_admission_conflict(&self) -> bool {
        matches!(self, StoreError::AdmissionConflict(_))
    }
}
