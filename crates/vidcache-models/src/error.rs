//! Model parsing errors.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Unknown resolution: {0}")]
    UnknownResolution(String),

    #[error("Invalid job key: {0}")]
    InvalidJobKey(String),
}

impl ModelError {
    pub fn invalid_job_key(key: impl Into<String>) -> Self {
        Self::InvalidJobKey(key.into())
    }
}
